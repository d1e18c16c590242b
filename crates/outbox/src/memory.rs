use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, text::abbreviate};
use tokio::sync::RwLock;

use crate::{
    MAX_ERROR_LEN, OutboxError, OutboxId, OutboxMessage, OutboxStatus, Result,
    store::{OutboxStore, lease_deadline},
};

/// In-memory outbox for testing and single-process runs.
///
/// Claims take the write lock, which gives the same exclusivity as a
/// skip-locked claim.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    rows: Arc<RwLock<Vec<OutboxMessage>>>,
    fail_on_claim: Arc<RwLock<bool>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends rows in one step; used by stores that write outbox rows
    /// alongside aggregate changes.
    pub async fn insert_all(&self, messages: Vec<OutboxMessage>) {
        self.rows.write().await.extend(messages);
    }

    /// Makes `claim_pending_batch` fail with [`OutboxError::Unavailable`].
    pub async fn set_fail_on_claim(&self, fail: bool) {
        *self.fail_on_claim.write().await = fail;
    }

    pub async fn all(&self) -> Vec<OutboxMessage> {
        self.rows.read().await.clone()
    }

    pub async fn count_by_status(&self, status: OutboxStatus) -> usize {
        self.rows
            .read()
            .await
            .iter()
            .filter(|m| m.status == status)
            .count()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    async fn update(&self, id: OutboxId, apply: impl FnOnce(&mut OutboxMessage)) -> Result<()> {
        let mut rows = self.rows.write().await;
        let row = rows
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(OutboxError::NotFound(id))?;
        apply(row);
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn enqueue(&self, message: OutboxMessage) -> Result<OutboxMessage> {
        self.rows.write().await.push(message.clone());
        Ok(message)
    }

    async fn claim_pending_batch(
        &self,
        limit: usize,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>> {
        if *self.fail_on_claim.read().await {
            return Err(OutboxError::Unavailable("simulated claim failure".into()));
        }

        let mut rows = self.rows.write().await;
        let mut candidates: Vec<&mut OutboxMessage> =
            rows.iter_mut().filter(|m| m.is_claimable(now)).collect();
        candidates.sort_by_key(|m| m.created_at);

        let until = lease_deadline(now, lease);
        Ok(candidates
            .into_iter()
            .take(limit)
            .map(|m| {
                m.claimed_until = Some(until);
                m.clone()
            })
            .collect())
    }

    async fn mark_sent(&self, id: OutboxId, at: DateTime<Utc>) -> Result<()> {
        self.update(id, |m| {
            m.status = OutboxStatus::Sent;
            m.claimed_until = None;
            m.updated_at = at;
        })
        .await
    }

    async fn mark_failed(&self, id: OutboxId, at: DateTime<Utc>, error: &str) -> Result<()> {
        let error = abbreviate(error, MAX_ERROR_LEN);
        self.update(id, |m| {
            m.status = OutboxStatus::Failed;
            m.last_error = Some(error);
            m.claimed_until = None;
            m.updated_at = at;
        })
        .await
    }

    async fn requeue_failed(
        &self,
        now: DateTime<Utc>,
        retry_before: DateTime<Utc>,
    ) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let mut moved = 0;
        for m in rows
            .iter_mut()
            .filter(|m| m.status == OutboxStatus::Failed && m.updated_at < retry_before)
        {
            m.status = OutboxStatus::Pending;
            m.claimed_until = None;
            m.updated_at = now;
            moved += 1;
        }
        Ok(moved)
    }

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxMessage>> {
        Ok(self.rows.read().await.iter().find(|m| m.id == id).cloned())
    }

    async fn list_by_aggregate(&self, aggregate_id: OrderId) -> Result<Vec<OutboxMessage>> {
        let rows = self.rows.read().await;
        let mut found: Vec<_> = rows
            .iter()
            .filter(|m| m.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        found.sort_by_key(|m| m.created_at);
        Ok(found)
    }
}

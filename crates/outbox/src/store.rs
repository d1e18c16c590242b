use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use common::OrderId;

use crate::{OutboxId, OutboxMessage, Result};

/// Storage for outbox rows.
///
/// Rows announcing a state change are written by the saga store inside the
/// same transaction as the change; `enqueue` covers standalone writes.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Inserts a new row.
    async fn enqueue(&self, message: OutboxMessage) -> Result<OutboxMessage>;

    /// Claims up to `limit` claimable rows, oldest first, leasing them until
    /// `now + lease`.
    ///
    /// Concurrent callers never receive the same row while its lease is live.
    async fn claim_pending_batch(
        &self,
        limit: usize,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>>;

    /// Marks a row `SENT` and releases its lease. `last_error` is kept.
    async fn mark_sent(&self, id: OutboxId, at: DateTime<Utc>) -> Result<()>;

    /// Marks a row `FAILED` with a diagnostic and releases its lease.
    async fn mark_failed(&self, id: OutboxId, at: DateTime<Utc>, error: &str) -> Result<()>;

    /// Moves `FAILED` rows last updated before `retry_before` back to
    /// `PENDING`. Returns the number of rows moved.
    async fn requeue_failed(&self, now: DateTime<Utc>, retry_before: DateTime<Utc>)
    -> Result<u64>;

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxMessage>>;

    /// Rows of one aggregate in creation order.
    async fn list_by_aggregate(&self, aggregate_id: OrderId) -> Result<Vec<OutboxMessage>>;
}

/// End of a lease starting at `now`.
pub fn lease_deadline(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    now + TimeDelta::from_std(lease).unwrap_or(TimeDelta::zero())
}

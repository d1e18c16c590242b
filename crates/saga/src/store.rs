//! Transactional order storage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, Version};
use domain::{Order, OrderRecord};
use outbox::{InMemoryOutboxStore, OutboxMessage};
use tokio::sync::RwLock;

use crate::{Result, SagaError};

/// Storage for order aggregates and the outbox rows their changes announce.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Stores a new order at [`Version::first`].
    async fn insert(&self, order: &Order) -> Result<Version>;

    async fn load(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Writes the order, its items and `outbox` in one transaction.
    ///
    /// Fails with [`SagaError::ConcurrencyConflict`] unless the stored
    /// version still equals `expected`. Returns the new version.
    async fn commit(
        &self,
        order: &Order,
        expected: Version,
        outbox: Vec<OutboxMessage>,
    ) -> Result<Version>;
}

/// In-memory saga store sharing its outbox with an [`InMemoryOutboxStore`].
///
/// The orders lock is held while the outbox rows are appended, so readers
/// never see an order change without its rows.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    orders: Arc<RwLock<HashMap<OrderId, OrderRecord>>>,
    outbox: InMemoryOutboxStore,
    fail_on_commit: Arc<RwLock<bool>>,
}

impl InMemorySagaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `outbox` for the rows written by `commit`.
    pub fn with_outbox(outbox: InMemoryOutboxStore) -> Self {
        Self {
            outbox,
            ..Self::default()
        }
    }

    pub fn outbox(&self) -> &InMemoryOutboxStore {
        &self.outbox
    }

    /// Makes `commit` fail with [`SagaError::Unavailable`].
    pub async fn set_fail_on_commit(&self, fail: bool) {
        *self.fail_on_commit.write().await = fail;
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn insert(&self, order: &Order) -> Result<Version> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id()) {
            return Err(SagaError::OrderExists(order.id()));
        }
        let mut record = order.record().clone();
        record.version = Version::first();
        orders.insert(order.id(), record);
        Ok(Version::first())
    }

    async fn load(&self, order_id: OrderId) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.get(&order_id).cloned().map(Order::from_record))
    }

    async fn commit(
        &self,
        order: &Order,
        expected: Version,
        outbox: Vec<OutboxMessage>,
    ) -> Result<Version> {
        if *self.fail_on_commit.read().await {
            return Err(SagaError::Unavailable("commit disabled".into()));
        }

        let mut orders = self.orders.write().await;
        let stored = orders
            .get_mut(&order.id())
            .ok_or(SagaError::OrderNotFound(order.id()))?;
        if stored.version != expected {
            return Err(SagaError::ConcurrencyConflict {
                order_id: order.id(),
                expected,
                actual: stored.version,
            });
        }

        let next = expected.next();
        let mut record = order.record().clone();
        record.version = next;
        *stored = record;
        self.outbox.insert_all(outbox).await;
        Ok(next)
    }
}

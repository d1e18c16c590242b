//! Saga listener: applies upstream results to orders.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::Version;
use domain::{Order, OrderError, Transition};
use messaging::{HandlerError, MessageHandler, Record};

use crate::contracts::{self, InboundEvent, InboundKind, InboundMessage, Outcome};
use crate::{Result, SagaError, SagaStore, TopicConfig};

/// Maps inbound topics to the result kind they carry.
#[derive(Debug, Clone)]
pub struct EventRegistry {
    kinds: HashMap<String, InboundKind>,
}

impl EventRegistry {
    pub fn from_topics(topics: &TopicConfig) -> Self {
        let kinds = [
            (&topics.validation_result, InboundKind::ValidationResult),
            (&topics.payment_result, InboundKind::PaymentResult),
            (&topics.stock_result, InboundKind::StockResult),
            (&topics.approval_result, InboundKind::ApprovalResult),
        ]
        .into_iter()
        .map(|(topic, kind)| (topic.clone(), kind))
        .collect();
        Self { kinds }
    }

    pub fn kind_of(&self, topic: &str) -> Option<InboundKind> {
        self.kinds.get(topic).copied()
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.kinds.keys().cloned().collect();
        topics.sort();
        topics
    }
}

/// Result of applying one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Duplicate or late delivery; nothing was written.
    Ignored,
    /// The order was written at `version` together with `enqueued` outbox rows.
    Committed { version: Version, enqueued: usize },
}

/// Consumes upstream results and drives each order through the saga.
///
/// Outbound announcements are written to the outbox in the same commit as
/// the order change; nothing is published from here.
pub struct SagaListener {
    store: Arc<dyn SagaStore>,
    topics: TopicConfig,
    registry: EventRegistry,
}

impl SagaListener {
    pub fn new(store: Arc<dyn SagaStore>, topics: TopicConfig) -> Self {
        let registry = EventRegistry::from_topics(&topics);
        Self {
            store,
            topics,
            registry,
        }
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    /// Loads the order, applies the event and commits the change with its
    /// outbox rows.
    #[tracing::instrument(
        skip(self, message),
        fields(order_id = %message.order_id, kind = message.event.kind().as_str())
    )]
    pub async fn apply(&self, message: InboundMessage) -> Result<Applied> {
        let kind = message.event.kind().as_str();
        let mut order = self
            .store
            .load(message.order_id)
            .await?
            .ok_or(SagaError::OrderNotFound(message.order_id))?;
        let expected = order.version();

        let transition = apply_event(&mut order, message.event)?;
        if !transition.is_changed() {
            metrics::counter!("saga_events_ignored_total", "kind" => kind).increment(1);
            tracing::debug!(status = %order.status(), "event ignored");
            return Ok(Applied::Ignored);
        }

        let rows = contracts::outbox_rows(
            order.id(),
            transition.into_milestones(),
            &self.topics,
            Utc::now(),
        )?;
        let enqueued = rows.len();
        let version = self.store.commit(&order, expected, rows).await?;

        metrics::counter!("saga_events_handled_total", "kind" => kind).increment(1);
        tracing::info!(
            status = %order.status(),
            version = %version,
            enqueued,
            "order updated"
        );
        Ok(Applied::Committed { version, enqueued })
    }
}

fn apply_event(order: &mut Order, event: InboundEvent) -> std::result::Result<Transition, OrderError> {
    let at = Utc::now();
    match event {
        InboundEvent::ValidationResult(Outcome::Success(items)) => {
            order.record_validation_success(items, at)
        }
        InboundEvent::ValidationResult(Outcome::Failure(())) => order.record_validation_failure(at),
        InboundEvent::PaymentResult(Outcome::Success(())) => order.record_payment_success(at),
        InboundEvent::PaymentResult(Outcome::Failure(())) => order.record_payment_failure(at),
        InboundEvent::StockResult(Outcome::Success(())) => order.record_stock_success(at),
        InboundEvent::StockResult(Outcome::Failure(error)) => order.record_stock_failure(error, at),
        InboundEvent::ApprovalResult(Outcome::Success(())) => order.record_approval(at),
        InboundEvent::ApprovalResult(Outcome::Failure(())) => order.record_rejection(at),
    }
}

#[async_trait]
impl MessageHandler for SagaListener {
    async fn handle(&self, record: &Record) -> std::result::Result<(), HandlerError> {
        let kind = self.registry.kind_of(&record.topic).ok_or_else(|| {
            HandlerError::malformed(
                "unknown_topic",
                format!("no handler registered for topic {}", record.topic),
            )
        })?;
        let message = contracts::decode(kind, record)?;
        self.apply(message).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use domain::{MenuId, Money, NewOrder, OrderItem, OrderStatus, StoreId};
    use outbox::OutboxStatus;

    use super::*;
    use crate::InMemorySagaStore;
    use crate::contracts::{ORDER_CANCELED_EVENT, ORDER_COMPLETED_EVENT, ORDER_STOCK_EVENT};

    async fn setup() -> (InMemorySagaStore, SagaListener, Order) {
        let store = InMemorySagaStore::new();
        let listener = SagaListener::new(Arc::new(store.clone()), TopicConfig::default());
        let order = Order::place(
            NewOrder::online(StoreId::new(), 42, Money::new(16000)),
            Utc::now(),
        );
        store.insert(&order).await.unwrap();
        (store, listener, order)
    }

    fn message(order: &Order, event: InboundEvent) -> InboundMessage {
        InboundMessage {
            order_id: order.id(),
            event,
        }
    }

    fn two_items() -> Vec<OrderItem> {
        vec![
            OrderItem::new(MenuId::new(), "Bibimbap", Money::new(9000), 1),
            OrderItem::new(MenuId::new(), "Mandu", Money::new(3500), 2),
        ]
    }

    #[tokio::test]
    async fn test_happy_path_scenario() {
        let (store, listener, order) = setup().await;
        let items = two_items();

        let applied = listener
            .apply(message(
                &order,
                InboundEvent::ValidationResult(Outcome::Success(items.clone())),
            ))
            .await
            .unwrap();
        assert_eq!(
            applied,
            Applied::Committed {
                version: Version::new(2),
                enqueued: 0
            }
        );
        let loaded = store.load(order.id()).await.unwrap().unwrap();
        assert_eq!(loaded.items().len(), 2);
        assert_eq!(loaded.history().labels(), vec!["PENDING", "VALIDATED"]);

        listener
            .apply(message(&order, InboundEvent::PaymentResult(Outcome::Success(()))))
            .await
            .unwrap();
        let rows = store.outbox().all().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_type, ORDER_STOCK_EVENT);
        let lines: serde_json::Value = serde_json::from_str(&rows[0].payload).unwrap();
        assert_eq!(lines[0]["quantity"], 1);
        assert_eq!(lines[1]["quantity"], 2);
        assert_eq!(lines[1]["menuId"], items[1].menu_id.to_string());

        listener
            .apply(message(&order, InboundEvent::StockResult(Outcome::Success(()))))
            .await
            .unwrap();
        let loaded = store.load(order.id()).await.unwrap().unwrap();
        assert_eq!(loaded.status(), OrderStatus::AcceptedReady);

        listener
            .apply(message(&order, InboundEvent::ApprovalResult(Outcome::Success(()))))
            .await
            .unwrap();
        let loaded = store.load(order.id()).await.unwrap().unwrap();
        assert_eq!(loaded.status(), OrderStatus::Accepted);

        let rows = store.outbox().all().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].event_type, ORDER_COMPLETED_EVENT);
        let completed: serde_json::Value = serde_json::from_str(&rows[1].payload).unwrap();
        assert_eq!(completed["totalPrice"], 16000);
        assert_eq!(completed["storeId"], order.store_id().to_string());
        assert!(rows.iter().all(|r| r.status == OutboxStatus::Pending));
    }

    #[tokio::test]
    async fn test_payment_failure_is_idempotent() {
        let (store, listener, order) = setup().await;
        let failure = InboundEvent::PaymentResult(Outcome::Failure(()));

        let first = listener.apply(message(&order, failure.clone())).await.unwrap();
        assert!(matches!(first, Applied::Committed { enqueued: 1, .. }));
        let second = listener.apply(message(&order, failure)).await.unwrap();
        assert_eq!(second, Applied::Ignored);

        let loaded = store.load(order.id()).await.unwrap().unwrap();
        assert_eq!(loaded.status(), OrderStatus::Canceled);
        let rows = store.outbox().all().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_type, ORDER_CANCELED_EVENT);
        assert!(rows[0].payload.contains("PAYMENT_FAILED"));
    }

    #[tokio::test]
    async fn test_fan_in_in_either_order_requests_stock_once() {
        for payment_first in [true, false] {
            let (store, listener, order) = setup().await;
            let validation = InboundEvent::ValidationResult(Outcome::Success(two_items()));
            let payment = InboundEvent::PaymentResult(Outcome::Success(()));
            let sequence = if payment_first {
                vec![payment.clone(), validation.clone(), payment, validation]
            } else {
                vec![validation.clone(), payment.clone(), validation, payment]
            };

            for event in sequence {
                listener.apply(message(&order, event)).await.unwrap();
            }

            let stock_rows = store
                .outbox()
                .all()
                .await
                .into_iter()
                .filter(|r| r.event_type == ORDER_STOCK_EVENT)
                .count();
            assert_eq!(stock_rows, 1, "payment_first = {payment_first}");
            let loaded = store.load(order.id()).await.unwrap().unwrap();
            assert_eq!(loaded.status(), OrderStatus::StockRequested);
        }
    }

    #[tokio::test]
    async fn test_stock_failure_keeps_error_on_outbox_row() {
        let (store, listener, order) = setup().await;
        listener
            .apply(message(
                &order,
                InboundEvent::StockResult(Outcome::Failure(Some("sold out".into()))),
            ))
            .await
            .unwrap();

        let rows = store.outbox().all().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].last_error.as_deref(), Some("sold out"));
    }

    #[tokio::test]
    async fn test_unknown_order_is_business_error() {
        let (_store, listener, _order) = setup().await;
        let err = listener
            .apply(InboundMessage {
                order_id: common::OrderId::new(),
                event: InboundEvent::PaymentResult(Outcome::Success(())),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::OrderNotFound(_)));
        assert_eq!(err.kind(), messaging::ErrorKind::Business);
    }

    #[tokio::test]
    async fn test_out_of_order_stock_result_is_rejected() {
        let (_store, listener, order) = setup().await;
        let err = listener
            .apply(message(&order, InboundEvent::StockResult(Outcome::Success(()))))
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::Domain(OrderError::InvalidStateTransition { .. })));
    }

    #[tokio::test]
    async fn test_commit_failure_is_transient() {
        let (store, listener, order) = setup().await;
        store.set_fail_on_commit(true).await;
        let err = listener
            .apply(message(&order, InboundEvent::PaymentResult(Outcome::Failure(()))))
            .await
            .unwrap_err();
        assert!(HandlerError::from(err).is_retryable());
        assert!(store.outbox().is_empty().await);
    }

    #[test]
    fn test_registry_maps_inbound_topics() {
        let registry = EventRegistry::from_topics(&TopicConfig::default());
        assert_eq!(
            registry.kind_of("stock.result"),
            Some(InboundKind::StockResult)
        );
        assert_eq!(registry.kind_of("order.canceled"), None);
        assert_eq!(registry.topics().len(), 4);
    }
}

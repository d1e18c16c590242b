//! End-to-end tests: inbound records through the listener container, the
//! saga, the outbox and the relay.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, Version};
use domain::{MenuId, Money, NewOrder, Order, OrderStatus, StoreId};
use messaging::{
    BackoffPolicy, ContainerConfig, ErrorPipeline, InMemoryBroker, ListenerContainer,
    ProducerRecord, Publisher, TopicSpec, header, provision_with_dead_letters,
};
use outbox::{OutboxMessage, OutboxRelay, OutboxStatus, RelayConfig};
use saga::contracts::{ORDER_CANCELED_EVENT, ORDER_COMPLETED_EVENT, ORDER_STOCK_EVENT};
use saga::{InMemorySagaStore, SagaError, SagaListener, SagaStore, TopicConfig};
use serde_json::Value;

struct Harness {
    broker: InMemoryBroker,
    store: InMemorySagaStore,
    topics: TopicConfig,
    container: ListenerContainer,
    relay: OutboxRelay,
}

async fn harness_with(saga_store: Arc<dyn SagaStore>, store: InMemorySagaStore) -> Harness {
    let topics = TopicConfig::default();
    let broker = InMemoryBroker::new();
    let specs: Vec<TopicSpec> = topics
        .inbound()
        .into_iter()
        .chain(topics.outbound())
        .map(|t| TopicSpec::live(t).with_partitions(3))
        .collect();
    provision_with_dead_letters(&broker, &specs).await.unwrap();

    let publisher: Arc<dyn Publisher> = Arc::new(broker.clone());
    let listener = Arc::new(SagaListener::new(saga_store, topics.clone()));
    let pipeline = ErrorPipeline::new(listener, publisher.clone(), BackoffPolicy::default());
    let container = ListenerContainer::new(
        ContainerConfig::new("order-saga", topics.inbound()),
        Arc::new(broker.clone()),
        Arc::new(pipeline),
    );
    let relay = OutboxRelay::new(
        Arc::new(store.outbox().clone()),
        publisher,
        RelayConfig::default(),
    );

    Harness {
        broker,
        store,
        topics,
        container,
        relay,
    }
}

async fn harness() -> Harness {
    let store = InMemorySagaStore::new();
    harness_with(Arc::new(store.clone()), store).await
}

impl Harness {
    async fn place_order(&self, total: i64) -> Order {
        let order = Order::place(
            NewOrder::online(StoreId::new(), 1001, Money::new(total))
                .with_delivery_address("12 Teheran-ro"),
            Utc::now(),
        );
        self.store.insert(&order).await.unwrap();
        order
    }

    async fn send(&self, topic: &str, order_id: OrderId, event_type: &str, payload: &str) {
        self.broker
            .publish(
                ProducerRecord::new(topic, payload)
                    .with_key(order_id.to_string())
                    .with_header(header::ORDER_ID, order_id.to_string())
                    .with_header(header::EVENT_TYPE, event_type),
            )
            .await
            .unwrap();
    }

    async fn status(&self, order_id: OrderId) -> OrderStatus {
        self.store.load(order_id).await.unwrap().unwrap().status()
    }
}

fn items_payload(lines: &[(MenuId, i64, u32)]) -> String {
    let items: Vec<Value> = lines
        .iter()
        .map(|(menu, price, quantity)| {
            serde_json::json!({
                "menuId": menu.to_string(),
                "menuName": "menu",
                "price": price,
                "quantity": quantity,
            })
        })
        .collect();
    Value::Array(items).to_string()
}

#[tokio::test]
async fn test_order_flows_from_results_to_published_events() {
    let h = harness().await;
    let order = h.place_order(21000).await;
    let id = order.id();
    let (pasta, salad) = (MenuId::new(), MenuId::new());

    h.send(
        &h.topics.validation_result,
        id,
        "success",
        &items_payload(&[(pasta, 8000, 2), (salad, 5000, 1)]),
    )
    .await;
    h.send(&h.topics.payment_result, id, "SUCCESS", "").await;
    h.container.poll_once().await.unwrap();
    assert_eq!(h.status(id).await, OrderStatus::StockRequested);

    let stats = h.relay.run_once().await.unwrap();
    assert_eq!(stats.sent, 1);
    let requests = h.broker.records(&h.topics.stock_request).await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].key.as_deref(), Some(id.to_string().as_str()));
    assert_eq!(
        requests[0].header_str(header::EVENT_TYPE).as_deref(),
        Some(ORDER_STOCK_EVENT)
    );
    let lines: Value = serde_json::from_str(&requests[0].payload_str()).unwrap();
    assert_eq!(lines.as_array().unwrap().len(), 2);
    assert_eq!(lines[0]["quantity"], 2);

    h.send(&h.topics.stock_result, id, "success", "").await;
    h.container.poll_once().await.unwrap();
    assert_eq!(h.status(id).await, OrderStatus::AcceptedReady);

    h.send(&h.topics.approval_result, id, "success", "").await;
    h.container.poll_once().await.unwrap();
    assert_eq!(h.status(id).await, OrderStatus::Accepted);

    h.relay.run_once().await.unwrap();
    let completed = h.broker.records(&h.topics.order_completed).await;
    assert_eq!(completed.len(), 1);
    assert_eq!(
        completed[0].header_str(header::EVENT_TYPE).as_deref(),
        Some(ORDER_COMPLETED_EVENT)
    );
    let body: Value = serde_json::from_str(&completed[0].payload_str()).unwrap();
    assert_eq!(body["totalPrice"], 21000);

    assert_eq!(h.store.outbox().count_by_status(OutboxStatus::Sent).await, 2);
    assert_eq!(h.broker.lag("order-saga", &h.topics.payment_result).await, 0);
}

#[tokio::test]
async fn test_redelivered_failure_cancels_once() {
    let h = harness().await;
    let order = h.place_order(9000).await;

    h.send(&h.topics.payment_result, order.id(), "fail", "").await;
    h.send(&h.topics.payment_result, order.id(), "fail", "").await;
    h.container.poll_once().await.unwrap();
    h.relay.run_once().await.unwrap();

    assert_eq!(h.status(order.id()).await, OrderStatus::Canceled);
    let canceled = h.broker.records(&h.topics.order_canceled).await;
    assert_eq!(canceled.len(), 1);
    assert_eq!(
        canceled[0].header_str(header::EVENT_TYPE).as_deref(),
        Some(ORDER_CANCELED_EVENT)
    );
    let body: Value = serde_json::from_str(&canceled[0].payload_str()).unwrap();
    assert_eq!(body["payload"][0]["reason"], "PAYMENT_FAILED");
}

#[tokio::test]
async fn test_stock_failure_payload_stays_on_outbox_row() {
    let h = harness().await;
    let order = h.place_order(9000).await;

    h.send(
        &h.topics.stock_result,
        order.id(),
        "failed",
        r#"{"errorMessage":"menu 17 is out of stock"}"#,
    )
    .await;
    h.container.poll_once().await.unwrap();
    h.relay.run_once().await.unwrap();

    let rows = h.store.outbox().all().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, OutboxStatus::Sent);
    assert_eq!(rows[0].last_error.as_deref(), Some("menu 17 is out of stock"));
}

#[tokio::test]
async fn test_malformed_and_unknown_orders_are_dead_lettered() {
    let h = harness().await;
    let order = h.place_order(9000).await;

    h.send(&h.topics.payment_result, order.id(), "maybe", "").await;
    h.send(&h.topics.payment_result, OrderId::new(), "success", "").await;
    h.container.poll_once().await.unwrap();

    let dead = h
        .broker
        .records(&format!("{}.DLT", h.topics.payment_result))
        .await;
    assert_eq!(dead.len(), 2);
    let codes: Vec<_> = dead
        .iter()
        .map(|r| r.header_str(header::DLT_EXCEPTION_FQCN))
        .collect();
    assert!(codes.contains(&Some("malformed_message".to_string())));
    assert!(codes.contains(&Some("order_not_found".to_string())));
    assert_eq!(h.status(order.id()).await, OrderStatus::Pending);
    assert_eq!(h.broker.lag("order-saga", &h.topics.payment_result).await, 0);
}

/// Reports one concurrency conflict, then delegates.
struct ConflictOnce {
    inner: InMemorySagaStore,
    fired: AtomicBool,
}

#[async_trait]
impl SagaStore for ConflictOnce {
    async fn insert(&self, order: &Order) -> saga::Result<Version> {
        self.inner.insert(order).await
    }

    async fn load(&self, order_id: OrderId) -> saga::Result<Option<Order>> {
        self.inner.load(order_id).await
    }

    async fn commit(
        &self,
        order: &Order,
        expected: Version,
        outbox: Vec<OutboxMessage>,
    ) -> saga::Result<Version> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            return Err(SagaError::ConcurrencyConflict {
                order_id: order.id(),
                expected,
                actual: expected.next(),
            });
        }
        self.inner.commit(order, expected, outbox).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_conflict_is_retried_in_place() {
    let store = InMemorySagaStore::new();
    let conflicting = Arc::new(ConflictOnce {
        inner: store.clone(),
        fired: AtomicBool::new(false),
    });
    let h = harness_with(conflicting.clone(), store).await;
    let order = h.place_order(9000).await;

    h.send(&h.topics.payment_result, order.id(), "fail", "").await;
    let stats = h.container.poll_once().await.unwrap();

    assert!(conflicting.fired.load(Ordering::SeqCst));
    assert_eq!(stats.handled, 1);
    assert_eq!(h.status(order.id()).await, OrderStatus::Canceled);
    assert_eq!(h.store.outbox().len().await, 1);
    assert_eq!(
        h.broker
            .record_count(&format!("{}.DLT", h.topics.payment_result))
            .await,
        0
    );
}

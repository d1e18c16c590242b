//! Integration tests for the saga worker runtime.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use domain::{MenuId, Money, NewOrder, Order, OrderStatus, StoreId};
use messaging::{InMemoryBroker, ProducerRecord, Publisher, RecordingNotifier, header};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::SagaStore;
use tokio::sync::watch;
use tower::ServiceExt;
use worker::{Config, Stores, Worker, WorkerInfo};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.partitions = 2;
    config.relay.interval = Duration::from_millis(20);
    config.backoff.initial_interval = Duration::from_millis(10);
    config
}

async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_health_check() {
    let info = WorkerInfo {
        store: "memory",
        consumer_groups: vec!["order-saga".into(), "replayer-from-dlt".into()],
    };
    let app = worker::create_app(info, get_metrics_handle());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["store"], "memory");
    assert_eq!(json["consumer_groups"][1], "replayer-from-dlt");
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_relay_counters() {
    let handle = get_metrics_handle();
    metrics::counter!("outbox_relay_sent_total").increment(1);

    let app = worker::create_app(
        WorkerInfo {
            store: "memory",
            consumer_groups: vec![],
        },
        handle,
    );
    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("outbox_relay_sent_total"));
}

#[tokio::test]
async fn test_provisioning_creates_dead_letter_twins() {
    let config = fast_config();
    let broker = InMemoryBroker::new();
    worker::provision_topics(&broker, &config).await.unwrap();

    let names = broker.topic_names().await;
    assert_eq!(names.len(), 14);
    let twin = broker.topic_spec("payment.result.DLT").await.unwrap();
    assert_eq!(twin.partitions, 2);
}

#[tokio::test]
async fn test_worker_runs_saga_end_to_end_and_drains() {
    let config = fast_config();
    let stores = Stores::in_memory();
    let broker = InMemoryBroker::new();
    worker::provision_topics(&broker, &config).await.unwrap();

    let notifier = RecordingNotifier::new();
    let worker = Worker::with_notifier(
        &config,
        &stores,
        Arc::new(broker.clone()),
        Arc::new(broker.clone()),
        Arc::new(notifier.clone()),
    );
    assert_eq!(worker.info().store, "memory");

    let order = Order::place(
        NewOrder::online(StoreId::new(), 5, Money::new(11000)),
        Utc::now(),
    );
    stores.saga.insert(&order).await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = worker.spawn(shutdown_rx);

    let send = |topic: String, event_type: &'static str, payload: String| {
        let broker = broker.clone();
        let id = order.id().to_string();
        async move {
            broker
                .publish(
                    ProducerRecord::new(topic, payload)
                        .with_key(id.clone())
                        .with_header(header::ORDER_ID, id)
                        .with_header(header::EVENT_TYPE, event_type),
                )
                .await
                .unwrap();
        }
    };

    let items = serde_json::json!([
        {"menuId": MenuId::new().to_string(), "menuName": "Jjamppong", "price": 11000, "quantity": 1}
    ]);
    send(config.topics.validation_result.clone(), "success", items.to_string()).await;
    send(config.topics.payment_result.clone(), "success", String::new()).await;

    wait_for(|| {
        let broker = broker.clone();
        let topic = config.topics.stock_request.clone();
        async move { broker.record_count(&topic).await == 1 }
    })
    .await;

    send(config.topics.stock_result.clone(), "success", String::new()).await;
    send(config.topics.approval_result.clone(), "success", String::new()).await;

    wait_for(|| {
        let broker = broker.clone();
        let topic = config.topics.order_completed.clone();
        async move { broker.record_count(&topic).await == 1 }
    })
    .await;

    let stored = stores.saga.load(order.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), OrderStatus::Accepted);
    assert!(notifier.alerts().await.is_empty());

    shutdown_tx.send(true).unwrap();
    for task in tasks {
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("task did not drain")
            .unwrap();
    }
}

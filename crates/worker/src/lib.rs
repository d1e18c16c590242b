//! Saga worker runtime.
//!
//! Wires the saga listener, the dead-letter reprocessor, the outbox relay and
//! the requeue worker onto one broker, and serves health and Prometheus
//! metrics over HTTP.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use messaging::{
    AlertNotifier, ContainerConfig, DeadLetterReprocessor, ErrorPipeline, ListenerContainer,
    Publisher, ReprocessorConfig, Subscriber, TopicAdmin, TopicSpec, WebhookNotifier,
    provision_with_dead_letters,
};
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{
    InMemoryOutboxStore, OutboxRelay, OutboxStore, PostgresOutboxStore, RequeueWorker,
};
use saga::{InMemorySagaStore, PostgresSagaStore, SagaListener, SagaStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

pub use config::{Config, LogFormat};
pub use error::WorkerError;

/// Consumer group of the saga listener.
pub const SAGA_GROUP: &str = "order-saga";

/// What the health endpoint reports.
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub store: &'static str,
    pub consumer_groups: Vec<String>,
}

/// Order and outbox storage sharing one backend.
#[derive(Clone)]
pub struct Stores {
    pub saga: Arc<dyn SagaStore>,
    pub outbox: Arc<dyn OutboxStore>,
    pub backend: &'static str,
}

impl Stores {
    pub fn in_memory() -> Self {
        let outbox = InMemoryOutboxStore::new();
        let saga = InMemorySagaStore::with_outbox(outbox.clone());
        Self {
            saga: Arc::new(saga),
            outbox: Arc::new(outbox),
            backend: "memory",
        }
    }

    /// Connects to PostgreSQL and runs migrations.
    pub async fn postgres(database_url: &str) -> Result<Self, WorkerError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let saga = PostgresSagaStore::new(pool.clone());
        saga.run_migrations().await?;
        Ok(Self {
            saga: Arc::new(saga),
            outbox: Arc::new(PostgresOutboxStore::new(pool)),
            backend: "postgres",
        })
    }

    /// PostgreSQL when `DATABASE_URL` is set, otherwise in-memory.
    pub async fn from_config(config: &Config) -> Result<Self, WorkerError> {
        match config.database_url.as_deref() {
            Some(url) => Self::postgres(url).await,
            None => Ok(Self::in_memory()),
        }
    }
}

/// Creates every inbound and outbound topic with its dead-letter twin.
pub async fn provision_topics(admin: &dyn TopicAdmin, config: &Config) -> Result<(), WorkerError> {
    let specs: Vec<TopicSpec> = config
        .topics
        .inbound()
        .into_iter()
        .chain(config.topics.outbound())
        .map(|name| TopicSpec::live(name).with_partitions(config.partitions))
        .collect();
    provision_with_dead_letters(admin, &specs).await?;
    Ok(())
}

/// The periodic units of one worker process.
pub struct Worker {
    saga_listener: ListenerContainer,
    dead_letters: ListenerContainer,
    relay: OutboxRelay,
    requeue: RequeueWorker,
    info: WorkerInfo,
}

impl Worker {
    /// Builds the worker with a webhook notifier from `config`.
    pub fn build(
        config: &Config,
        stores: &Stores,
        publisher: Arc<dyn Publisher>,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<Self, WorkerError> {
        let notifier = WebhookNotifier::new(config.webhook.clone())?;
        if !notifier.is_configured() {
            tracing::warn!("DLT_WEBHOOK_URL not set; dead-letter alerts will only be logged");
        }
        Ok(Self::with_notifier(
            config,
            stores,
            publisher,
            subscriber,
            Arc::new(notifier),
        ))
    }

    pub fn with_notifier(
        config: &Config,
        stores: &Stores,
        publisher: Arc<dyn Publisher>,
        subscriber: Arc<dyn Subscriber>,
        notifier: Arc<dyn AlertNotifier>,
    ) -> Self {
        let inbound = config.topics.inbound();

        let listener = Arc::new(SagaListener::new(stores.saga.clone(), config.topics.clone()));
        let pipeline = ErrorPipeline::new(listener, publisher.clone(), config.backoff.clone());
        let saga_listener = ListenerContainer::new(
            ContainerConfig::new(SAGA_GROUP, inbound.clone()),
            subscriber.clone(),
            Arc::new(pipeline),
        );

        let replay = ReprocessorConfig::for_topics(inbound.as_slice())
            .with_max_attempts(config.dlt_max_attempts);
        let dead_letters = ListenerContainer::new(
            ContainerConfig::new(replay.group.clone(), replay.topics.clone()),
            subscriber,
            Arc::new(DeadLetterReprocessor::new(replay, publisher.clone(), notifier)),
        );

        let relay = OutboxRelay::new(stores.outbox.clone(), publisher, config.relay.clone());
        let requeue = RequeueWorker::new(stores.outbox.clone(), config.requeue.clone());

        let info = WorkerInfo {
            store: stores.backend,
            consumer_groups: vec![
                saga_listener.config().group.clone(),
                dead_letters.config().group.clone(),
            ],
        };

        Self {
            saga_listener,
            dead_letters,
            relay,
            requeue,
            info,
        }
    }

    pub fn info(&self) -> WorkerInfo {
        self.info.clone()
    }

    /// Spawns every unit. Each finishes its in-flight cycle after `shutdown`
    /// flips to true.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let Self {
            saga_listener,
            dead_letters,
            relay,
            requeue,
            ..
        } = self;

        let rx = shutdown.clone();
        let saga_task = tokio::spawn(async move { saga_listener.run(rx).await });
        let rx = shutdown.clone();
        let dlt_task = tokio::spawn(async move { dead_letters.run(rx).await });
        let rx = shutdown.clone();
        let relay_task = tokio::spawn(async move { relay.run(rx).await });
        let requeue_task = tokio::spawn(async move { requeue.run(shutdown).await });

        vec![saga_task, dlt_task, relay_task, requeue_task]
    }
}

/// Creates the health and metrics router.
pub fn create_app(info: WorkerInfo, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .with_state(info)
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http())
}

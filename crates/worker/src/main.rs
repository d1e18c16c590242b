//! Saga worker entry point.

use std::sync::Arc;

use messaging::InMemoryBroker;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use worker::{Config, LogFormat, Stores, Worker, WorkerError};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(%error, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| WorkerError::Metrics(e.to_string()))?;

    // 3. Stores and broker
    let stores = Stores::from_config(&config).await?;
    let broker = InMemoryBroker::new();
    worker::provision_topics(&broker, &config).await?;
    tracing::info!(store = stores.backend, partitions = config.partitions, "topics provisioned");

    // 4. Periodic units
    let worker = Worker::build(
        &config,
        &stores,
        Arc::new(broker.clone()),
        Arc::new(broker),
    )?;
    let app = worker::create_app(worker.info(), metrics_handle);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = worker.spawn(shutdown_rx.clone());

    // 5. Health and metrics server; a signal flips the shutdown channel
    let addr = config.addr();
    tracing::info!(%addr, "starting saga worker");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let mut server_shutdown = shutdown_rx;
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    // 6. Drain: every unit finishes its in-flight cycle
    for task in tasks {
        if let Err(error) = task.await {
            tracing::error!(%error, "worker task panicked");
        }
    }
    match server.await {
        Ok(result) => result?,
        Err(error) => tracing::error!(%error, "HTTP server task panicked"),
    }

    tracing::info!("saga worker shut down gracefully");
    Ok(())
}

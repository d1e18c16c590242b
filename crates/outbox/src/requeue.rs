//! Returns stale `FAILED` outbox rows to `PENDING`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;

use crate::{OutboxStore, Result};

/// Requeue worker settings.
#[derive(Debug, Clone)]
pub struct RequeueConfig {
    /// Pause between cycles.
    pub interval: Duration,
    /// Minimum age of a failure before it is retried.
    pub older_than: Duration,
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            older_than: Duration::from_secs(5 * 60),
        }
    }
}

/// Periodically hands failed rows back to the relay.
pub struct RequeueWorker {
    store: Arc<dyn OutboxStore>,
    config: RequeueConfig,
}

impl RequeueWorker {
    pub fn new(store: Arc<dyn OutboxStore>, config: RequeueConfig) -> Self {
        Self { store, config }
    }

    /// Requeues rows that failed before `now - older_than`.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<u64> {
        let age = TimeDelta::from_std(self.config.older_than).unwrap_or(TimeDelta::zero());
        let moved = self.store.requeue_failed(now, now - age).await?;
        if moved > 0 {
            metrics::counter!("outbox_requeued_total").increment(moved);
            tracing::info!(moved, "Requeued failed outbox messages");
        }
        Ok(moved)
    }

    /// Runs cycles until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval = ?self.config.interval, older_than = ?self.config.older_than, "Outbox requeue worker started");
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.run_once(Utc::now()).await {
                        tracing::error!(error = %error, "Outbox requeue cycle failed");
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender can never signal again.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Outbox requeue worker stopped");
    }
}

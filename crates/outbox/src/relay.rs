//! Publishes pending outbox rows.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use common::text::abbreviate;
use messaging::{ProducerRecord, Publisher, header};
use tokio::sync::watch;

use crate::{OutboxMessage, OutboxStore, Result};

/// Relay error strings are cut to this many characters before storage.
pub const RELAY_ERROR_LEN: usize = 480;

/// Relay settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Pause between cycles.
    pub interval: Duration,
    /// Maximum rows claimed per cycle.
    pub batch_size: usize,
    /// How long a claim protects a row from other relays.
    pub lease: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            batch_size: 200,
            lease: Duration::from_secs(30),
        }
    }
}

/// Counts from one relay cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Moves outbox rows to the broker.
///
/// Each row is published with the aggregate id as key and `orderId` and
/// `eventType` headers. A failed publish marks only that row `FAILED`; the
/// rest of the batch continues.
pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn Publisher>,
    config: RelayConfig,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn Publisher>,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    /// Runs one claim-publish-mark cycle.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<RelayStats> {
        let started = Instant::now();
        let batch = self
            .store
            .claim_pending_batch(self.config.batch_size, self.config.lease, Utc::now())
            .await?;

        let mut stats = RelayStats {
            claimed: batch.len(),
            ..RelayStats::default()
        };
        if batch.is_empty() {
            return Ok(stats);
        }

        for message in &batch {
            match self.relay(message).await {
                Ok(true) => stats.sent += 1,
                Ok(false) => stats.failed += 1,
                Err(error) => {
                    // Lease expiry hands the row to a later cycle.
                    tracing::error!(outbox_id = %message.id, error = %error, "Failed to record relay outcome");
                    stats.failed += 1;
                }
            }
        }

        metrics::counter!("outbox_relay_sent_total").increment(stats.sent as u64);
        metrics::counter!("outbox_relay_failed_total").increment(stats.failed as u64);
        metrics::histogram!("outbox_relay_batch_seconds").record(started.elapsed().as_secs_f64());
        tracing::debug!(claimed = stats.claimed, sent = stats.sent, failed = stats.failed, "Relay cycle finished");
        Ok(stats)
    }

    /// Publishes one row. Returns whether it was sent.
    async fn relay(&self, message: &OutboxMessage) -> Result<bool> {
        let key = message.aggregate_id.to_string();
        let record = ProducerRecord::new(message.topic.clone(), message.payload.as_bytes())
            .with_key(key.clone())
            .with_header(header::ORDER_ID, key)
            .with_header(header::EVENT_TYPE, message.event_type.as_bytes());

        match self.publisher.publish(record).await {
            Ok(meta) => {
                self.store.mark_sent(message.id, Utc::now()).await?;
                tracing::info!(
                    outbox_id = %message.id,
                    topic = %message.topic,
                    event_type = %message.event_type,
                    partition = meta.partition,
                    offset = meta.offset,
                    "Outbox message sent"
                );
                Ok(true)
            }
            Err(error) => {
                let reason = abbreviate(&error.to_string(), RELAY_ERROR_LEN);
                self.store.mark_failed(message.id, Utc::now(), &reason).await?;
                tracing::warn!(
                    outbox_id = %message.id,
                    topic = %message.topic,
                    error = %reason,
                    "Outbox publish failed"
                );
                Ok(false)
            }
        }
    }

    /// Runs cycles until `shutdown` flips to true. The cycle in flight
    /// completes before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval = ?self.config.interval, batch_size = self.config.batch_size, "Outbox relay started");
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.run_once().await {
                        tracing::error!(error = %error, "Outbox relay cycle failed");
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
        tracing::info!("Outbox relay stopped");
    }
}

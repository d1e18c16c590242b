//! Polling consumer loop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;

use crate::{MessageHandler, Record, Result, Subscriber};

/// Settings of one listener container.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub group: String,
    pub topics: Vec<String>,
    pub max_poll_records: usize,
    pub poll_interval: Duration,
}

impl ContainerConfig {
    pub fn new(group: impl Into<String>, topics: Vec<String>) -> Self {
        Self {
            group: group.into(),
            topics,
            max_poll_records: 100,
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Counts from one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub handled: usize,
    pub failed: usize,
}

/// Feeds records from a [`Subscriber`] into a [`MessageHandler`].
///
/// Partitions are processed concurrently, records within a partition in
/// offset order. An offset is committed only after its record was handled,
/// and a partition stops at the first failure so the record is delivered
/// again on the next poll.
pub struct ListenerContainer {
    config: ContainerConfig,
    subscriber: Arc<dyn Subscriber>,
    handler: Arc<dyn MessageHandler>,
}

impl ListenerContainer {
    pub fn new(
        config: ContainerConfig,
        subscriber: Arc<dyn Subscriber>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            config,
            subscriber,
            handler,
        }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Runs one poll cycle.
    pub async fn poll_once(&self) -> Result<PollStats> {
        let records = self
            .subscriber
            .poll(
                &self.config.group,
                &self.config.topics,
                self.config.max_poll_records,
            )
            .await?;

        let mut partitions: BTreeMap<(String, i32), Vec<Record>> = BTreeMap::new();
        for record in records {
            partitions
                .entry((record.topic.clone(), record.partition))
                .or_default()
                .push(record);
        }

        let results = join_all(
            partitions
                .into_values()
                .map(|records| self.process_partition(records)),
        )
        .await;

        let mut stats = PollStats::default();
        for result in results {
            let partition = result?;
            stats.handled += partition.handled;
            stats.failed += partition.failed;
        }
        Ok(stats)
    }

    async fn process_partition(&self, records: Vec<Record>) -> Result<PollStats> {
        let mut stats = PollStats::default();
        for record in records {
            if let Err(error) = self.handler.handle(&record).await {
                tracing::warn!(
                    group = %self.config.group,
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %error,
                    "Record not handled; will be redelivered"
                );
                stats.failed += 1;
                break;
            }
            self.subscriber
                .commit(
                    &self.config.group,
                    &record.topic,
                    record.partition,
                    record.offset + 1,
                )
                .await?;
            stats.handled += 1;
        }
        Ok(stats)
    }

    /// Polls until `shutdown` flips to true. The cycle in flight completes
    /// before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            group = %self.config.group,
            topics = ?self.config.topics,
            "Listener container started"
        );
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.poll_once().await {
                        tracing::error!(group = %self.config.group, error = %error, "Poll cycle failed");
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
        tracing::info!(group = %self.config.group, "Listener container stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::{HandlerError, InMemoryBroker, ProducerRecord, Publisher, TopicAdmin, TopicSpec};

    #[derive(Default)]
    struct Collecting {
        seen: Mutex<Vec<String>>,
        reject: AtomicBool,
    }

    #[async_trait]
    impl MessageHandler for Collecting {
        async fn handle(&self, record: &Record) -> std::result::Result<(), HandlerError> {
            if self.reject.load(Ordering::SeqCst) && record.payload_str() == "poison" {
                return Err(HandlerError::transient("down", "store unavailable"));
            }
            self.seen.lock().await.push(record.payload_str());
            Ok(())
        }
    }

    async fn broker() -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker
            .create_topic(&TopicSpec::live("events").with_partitions(1))
            .await
            .unwrap();
        broker
    }

    #[tokio::test]
    async fn test_poll_once_handles_and_commits() {
        let broker = broker().await;
        for p in ["a", "b"] {
            broker.publish(ProducerRecord::new("events", p)).await.unwrap();
        }
        let handler = Arc::new(Collecting::default());
        let container = ListenerContainer::new(
            ContainerConfig::new("g", vec!["events".into()]),
            Arc::new(broker.clone()),
            handler.clone(),
        );

        let stats = container.poll_once().await.unwrap();
        assert_eq!(stats, PollStats { handled: 2, failed: 0 });
        assert_eq!(broker.committed_offset("g", "events", 0).await, Some(2));
        assert_eq!(*handler.seen.lock().await, vec!["a", "b"]);

        let stats = container.poll_once().await.unwrap();
        assert_eq!(stats, PollStats::default());
    }

    #[tokio::test]
    async fn test_failure_stops_partition_and_redelivers() {
        let broker = broker().await;
        for p in ["a", "poison", "c"] {
            broker.publish(ProducerRecord::new("events", p)).await.unwrap();
        }
        let handler = Arc::new(Collecting::default());
        handler.reject.store(true, Ordering::SeqCst);
        let container = ListenerContainer::new(
            ContainerConfig::new("g", vec!["events".into()]),
            Arc::new(broker.clone()),
            handler.clone(),
        );

        let stats = container.poll_once().await.unwrap();
        assert_eq!(stats, PollStats { handled: 1, failed: 1 });
        assert_eq!(broker.committed_offset("g", "events", 0).await, Some(1));

        handler.reject.store(false, Ordering::SeqCst);
        let stats = container.poll_once().await.unwrap();
        assert_eq!(stats.handled, 2);
        assert_eq!(*handler.seen.lock().await, vec!["a", "poison", "c"]);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let broker = broker().await;
        let container = Arc::new(ListenerContainer::new(
            ContainerConfig::new("g", vec!["events".into()])
                .with_poll_interval(Duration::from_millis(5)),
            Arc::new(broker.clone()),
            Arc::new(Collecting::default()),
        ));
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn({
            let container = container.clone();
            async move { container.run(rx).await }
        });
        broker.publish(ProducerRecord::new("events", "x")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(broker.committed_offset("g", "events", 0).await, Some(1));
    }

    #[tokio::test]
    async fn test_run_stops_when_sender_dropped() {
        let broker = broker().await;
        let container = ListenerContainer::new(
            ContainerConfig::new("g", vec!["events".into()])
                .with_poll_interval(Duration::from_millis(5)),
            Arc::new(broker),
            Arc::new(Collecting::default()),
        );
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(async move { container.run(rx).await });
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("container should stop once the sender is gone")
            .unwrap();
    }
}

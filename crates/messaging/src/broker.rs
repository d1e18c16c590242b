//! Broker client seams.

use async_trait::async_trait;

use crate::{ProducerRecord, Record, RecordMetadata, Result, TopicSpec};

/// Publishes records to a topic.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes one record and waits for the broker acknowledgment.
    async fn publish(&self, record: ProducerRecord) -> Result<RecordMetadata>;
}

/// Consumes records on behalf of a consumer group.
///
/// Delivery is at-least-once: `poll` returns records from the group's
/// committed position, so anything not committed is delivered again.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Returns up to `max_per_partition` uncommitted records per partition of
    /// each topic, in offset order.
    async fn poll(
        &self,
        group: &str,
        topics: &[String],
        max_per_partition: usize,
    ) -> Result<Vec<Record>>;

    /// Commits `next_offset` as the group's position on a partition.
    async fn commit(&self, group: &str, topic: &str, partition: i32, next_offset: i64)
    -> Result<()>;
}

/// Creates topics.
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    /// Creates a topic. Creating an existing topic is a no-op.
    async fn create_topic(&self, spec: &TopicSpec) -> Result<()>;
}

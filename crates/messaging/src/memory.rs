use std::collections::{HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::{
    BusError, ProducerRecord, Publisher, Record, RecordMetadata, Result, Subscriber, TopicAdmin,
    TopicSpec,
};

struct Topic {
    spec: TopicSpec,
    partitions: Vec<Vec<Record>>,
}

#[derive(Default)]
struct State {
    topics: HashMap<String, Topic>,
    committed: HashMap<(String, String, i32), i64>,
    round_robin: usize,
    fail_on_publish: bool,
    failing_topics: HashSet<String>,
}

/// In-memory partitioned broker for tests and single-process runs.
///
/// Offsets are positions in a partition log. Consumer groups track committed
/// positions only, so uncommitted records are redelivered by the next poll.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
}

impl InMemoryBroker {
    /// Creates a broker without topics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every publish fail with [`BusError::Unavailable`].
    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.state.lock().await.fail_on_publish = fail;
    }

    /// Makes publishes to one topic fail with [`BusError::Unavailable`].
    pub async fn set_fail_on_topic(&self, topic: &str, fail: bool) {
        let mut state = self.state.lock().await;
        if fail {
            state.failing_topics.insert(topic.to_string());
        } else {
            state.failing_topics.remove(topic);
        }
    }

    /// Returns every record of a topic, partition by partition.
    pub async fn records(&self, topic: &str) -> Vec<Record> {
        let state = self.state.lock().await;
        state
            .topics
            .get(topic)
            .map(|t| t.partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn record_count(&self, topic: &str) -> usize {
        let state = self.state.lock().await;
        state
            .topics
            .get(topic)
            .map(|t| t.partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub async fn topic_spec(&self, topic: &str) -> Option<TopicSpec> {
        let state = self.state.lock().await;
        state.topics.get(topic).map(|t| t.spec.clone())
    }

    pub async fn topic_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<_> = state.topics.keys().cloned().collect();
        names.sort();
        names
    }

    /// Committed position of a group on a partition, if any.
    pub async fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        let state = self.state.lock().await;
        state
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Number of records of a topic the group has not committed yet.
    pub async fn lag(&self, group: &str, topic: &str) -> usize {
        let state = self.state.lock().await;
        let Some(t) = state.topics.get(topic) else {
            return 0;
        };
        t.partitions
            .iter()
            .enumerate()
            .map(|(p, log)| {
                let committed = state
                    .committed
                    .get(&(group.to_string(), topic.to_string(), p as i32))
                    .copied()
                    .unwrap_or(0);
                log.len().saturating_sub(committed as usize)
            })
            .sum()
    }
}

fn partition_for(key: &str, partitions: i32) -> i32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as i32
}

#[async_trait]
impl Publisher for InMemoryBroker {
    async fn publish(&self, record: ProducerRecord) -> Result<RecordMetadata> {
        let mut state = self.state.lock().await;

        if state.fail_on_publish || state.failing_topics.contains(&record.topic) {
            return Err(BusError::Unavailable(format!(
                "simulated publish failure for topic {}",
                record.topic
            )));
        }

        let round_robin = state.round_robin;
        let topic = state
            .topics
            .get_mut(&record.topic)
            .ok_or_else(|| BusError::UnknownTopic(record.topic.clone()))?;
        let partitions = topic.spec.partitions;

        let partition = match (record.partition, record.key.as_deref()) {
            (Some(p), _) => p,
            (None, Some(key)) => partition_for(key, partitions),
            (None, None) => (round_robin % partitions as usize) as i32,
        };
        let log = topic
            .partitions
            .get_mut(partition as usize)
            .filter(|_| partition >= 0)
            .ok_or_else(|| BusError::UnknownPartition {
                topic: record.topic.clone(),
                partition,
            })?;

        let offset = log.len() as i64;
        log.push(Record {
            topic: record.topic,
            partition,
            offset,
            key: record.key,
            headers: record.headers,
            payload: record.payload,
            timestamp: Utc::now(),
        });
        state.round_robin = round_robin.wrapping_add(1);

        Ok(RecordMetadata { partition, offset })
    }
}

#[async_trait]
impl Subscriber for InMemoryBroker {
    async fn poll(
        &self,
        group: &str,
        topics: &[String],
        max_per_partition: usize,
    ) -> Result<Vec<Record>> {
        let state = self.state.lock().await;
        let mut records = Vec::new();

        for name in topics {
            let topic = state
                .topics
                .get(name)
                .ok_or_else(|| BusError::UnknownTopic(name.clone()))?;

            for (p, log) in topic.partitions.iter().enumerate() {
                let from = state
                    .committed
                    .get(&(group.to_string(), name.clone(), p as i32))
                    .copied()
                    .unwrap_or(0) as usize;
                records.extend(log.iter().skip(from).take(max_per_partition).cloned());
            }
        }

        Ok(records)
    }

    async fn commit(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
        next_offset: i64,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.topics.contains_key(topic) {
            return Err(BusError::UnknownTopic(topic.to_string()));
        }
        let entry = state
            .committed
            .entry((group.to_string(), topic.to_string(), partition))
            .or_insert(0);
        *entry = (*entry).max(next_offset);
        Ok(())
    }
}

#[async_trait]
impl TopicAdmin for InMemoryBroker {
    async fn create_topic(&self, spec: &TopicSpec) -> Result<()> {
        if spec.partitions <= 0 {
            return Err(BusError::InvalidTopic {
                topic: spec.name.clone(),
                reason: format!("partition count must be positive, got {}", spec.partitions),
            });
        }
        let mut state = self.state.lock().await;
        state.topics.entry(spec.name.clone()).or_insert_with(|| Topic {
            spec: spec.clone(),
            partitions: vec![Vec::new(); spec.partitions as usize],
        });
        Ok(())
    }
}

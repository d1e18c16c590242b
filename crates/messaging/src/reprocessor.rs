//! Replays dead-lettered records and alerts once the replay budget is spent.

use std::sync::Arc;

use async_trait::async_trait;
use common::text::{cut, or_dash};

use crate::{
    Alert, AlertNotifier, HandlerError, MessageHandler, ProducerRecord, Publisher, Record,
    dead_letter_topic, header,
};

/// Consumer group of the reprocessor.
pub const REPLAY_GROUP: &str = "replayer-from-dlt";

const DESCRIPTION_LIMIT: usize = 3500;

/// Reprocessor settings.
#[derive(Debug, Clone)]
pub struct ReprocessorConfig {
    /// Dead-letter topics to consume.
    pub topics: Vec<String>,
    /// Replays allowed before alerting.
    pub max_attempts: u32,
    pub group: String,
    pub alert_title: String,
}

impl ReprocessorConfig {
    /// Consumes the dead-letter twin of every topic in `live_topics`.
    pub fn for_topics<S: AsRef<str>>(live_topics: &[S]) -> Self {
        Self {
            topics: live_topics
                .iter()
                .map(|t| dead_letter_topic(t.as_ref()))
                .collect(),
            max_attempts: 3,
            group: REPLAY_GROUP.to_string(),
            alert_title: "Kafka DLT alert".to_string(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// What happened to a dead-lettered record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Republished to the original topic with the given attempt number.
    Republished { topic: String, attempt: u32 },
    /// Replay budget exhausted; an alert was raised.
    Alerted { attempt: u32 },
    /// The record had no original-topic header and was dropped.
    Dropped,
}

/// Dead-letter reprocessor.
pub struct DeadLetterReprocessor {
    config: ReprocessorConfig,
    publisher: Arc<dyn Publisher>,
    notifier: Arc<dyn AlertNotifier>,
}

impl DeadLetterReprocessor {
    pub fn new(
        config: ReprocessorConfig,
        publisher: Arc<dyn Publisher>,
        notifier: Arc<dyn AlertNotifier>,
    ) -> Self {
        Self {
            config,
            publisher,
            notifier,
        }
    }

    pub fn config(&self) -> &ReprocessorConfig {
        &self.config
    }

    /// Replays or alerts on one dead-lettered record.
    ///
    /// Fails only when the replay publish fails, leaving the record to be
    /// delivered again.
    #[tracing::instrument(skip(self, record), fields(dlt_topic = %record.topic, partition = record.partition, offset = record.offset))]
    pub async fn reprocess(&self, record: &Record) -> Result<ReplayOutcome, HandlerError> {
        let Some(original_topic) = record.header_str(header::DLT_ORIGINAL_TOPIC) else {
            tracing::error!(key = ?record.key, "Dead-lettered record has no original-topic header; dropping");
            return Ok(ReplayOutcome::Dropped);
        };

        let attempt = retry_attempt(record);
        if attempt >= self.config.max_attempts {
            let alert = self.build_alert(record, &original_topic, attempt);
            self.notifier.notify(&alert).await;
            metrics::counter!("dlt_alerts_total", "topic" => original_topic.clone()).increment(1);
            tracing::error!(
                topic = %original_topic,
                key = ?record.key,
                attempt,
                "Replay budget exhausted; operator alerted"
            );
            return Ok(ReplayOutcome::Alerted { attempt });
        }

        let next = attempt + 1;
        let mut headers = record.headers.clone();
        headers.insert(header::RETRY_ATTEMPT, next.to_string());

        let mut replay = ProducerRecord::new(original_topic.clone(), record.payload.clone())
            .with_headers(headers);
        replay.key = record.key.clone();

        self.publisher
            .publish(replay)
            .await
            .map_err(|e| HandlerError::transient("replay_publish_failed", e.to_string()))?;

        metrics::counter!("dlt_republished_total", "topic" => original_topic.clone()).increment(1);
        tracing::info!(
            topic = %original_topic,
            key = ?record.key,
            attempt = next,
            max_attempts = self.config.max_attempts,
            "Replayed dead-lettered record"
        );
        Ok(ReplayOutcome::Republished {
            topic: original_topic,
            attempt: next,
        })
    }

    fn build_alert(&self, record: &Record, original_topic: &str, attempt: u32) -> Alert {
        let headers = &record.headers;
        let original_partition = headers
            .last_i32(&[header::DLT_ORIGINAL_PARTITION, header::ORIGINAL_PARTITION])
            .map(|p| p.to_string());
        let original_offset = headers
            .last_i64(&[header::DLT_ORIGINAL_OFFSET, header::ORIGINAL_OFFSET])
            .map(|o| o.to_string());

        Alert::new(&self.config.alert_title, describe_payload(&record.payload_str()))
            .field("Topic", original_topic)
            .field("Key", or_dash(record.key.as_deref()))
            .field(
                "OrderId",
                or_dash(record.header_str(header::ORDER_ID).as_deref()),
            )
            .field(
                "Original P/Off",
                format!(
                    "{} / {}",
                    or_dash(original_partition.as_deref()),
                    or_dash(original_offset.as_deref())
                ),
            )
            .field(
                "DLT Partition/Offset",
                format!("{} / {}", record.partition, record.offset),
            )
            .field(
                "Attempts (DLT)",
                format!("{attempt} / {}", self.config.max_attempts),
            )
            .field(
                "Exception",
                or_dash(record.header_str(header::DLT_EXCEPTION_FQCN).as_deref()),
            )
            .field(
                "Message",
                or_dash(record.header_str(header::DLT_EXCEPTION_MESSAGE).as_deref()),
            )
    }
}

#[async_trait]
impl MessageHandler for DeadLetterReprocessor {
    async fn handle(&self, record: &Record) -> Result<(), HandlerError> {
        self.reprocess(record).await.map(|_| ())
    }
}

fn retry_attempt(record: &Record) -> u32 {
    let Some(raw) = record.header_str(header::RETRY_ATTEMPT) else {
        return 0;
    };
    match raw.trim().parse() {
        Ok(attempt) => attempt,
        Err(_) => {
            tracing::warn!(value = %raw, "Unparsable retry header; treating as first attempt");
            0
        }
    }
}

/// Pretty-prints JSON payloads and bounds the result.
fn describe_payload(payload: &str) -> String {
    let pretty = serde_json::from_str::<serde_json::Value>(payload)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or_else(|| payload.to_string());
    cut(&pretty, DESCRIPTION_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Headers, InMemoryBroker, RecordingNotifier, TopicAdmin, TopicSpec};

    async fn setup() -> (InMemoryBroker, RecordingNotifier, DeadLetterReprocessor) {
        let broker = InMemoryBroker::new();
        let spec = TopicSpec::live("stock.result").with_partitions(2);
        broker.create_topic(&spec).await.unwrap();
        broker.create_topic(&spec.dead_letter()).await.unwrap();
        let notifier = RecordingNotifier::new();
        let reprocessor = DeadLetterReprocessor::new(
            ReprocessorConfig::for_topics(&["stock.result"]),
            Arc::new(broker.clone()),
            Arc::new(notifier.clone()),
        );
        (broker, notifier, reprocessor)
    }

    fn dead_record(attempt: Option<&str>) -> Record {
        let mut headers = Headers::new()
            .with(header::ORDER_ID, "order-1")
            .with(header::EVENT_TYPE, "fail")
            .with(header::DLT_ORIGINAL_TOPIC, "stock.result")
            .with(header::DLT_ORIGINAL_PARTITION, 1i32.to_be_bytes().to_vec())
            .with(header::DLT_ORIGINAL_OFFSET, 77i64.to_be_bytes().to_vec())
            .with(header::DLT_EXCEPTION_FQCN, "invalid_transition")
            .with(header::DLT_EXCEPTION_MESSAGE, "cannot confirm stock from PENDING");
        if let Some(a) = attempt {
            headers.insert(header::RETRY_ATTEMPT, a);
        }
        Record {
            topic: "stock.result.DLT".into(),
            partition: 1,
            offset: 5,
            key: Some("order-1".into()),
            headers,
            payload: br#"{"orderId":"order-1","status":"fail"}"#.to_vec(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_first_replay_sets_attempt_one() {
        let (broker, notifier, reprocessor) = setup().await;

        let outcome = reprocessor.reprocess(&dead_record(None)).await.unwrap();
        assert_eq!(
            outcome,
            ReplayOutcome::Republished {
                topic: "stock.result".into(),
                attempt: 1
            }
        );

        let replayed = broker.records("stock.result").await;
        assert_eq!(replayed.len(), 1);
        let replayed = &replayed[0];
        assert_eq!(replayed.key.as_deref(), Some("order-1"));
        assert_eq!(replayed.header_str(header::RETRY_ATTEMPT).as_deref(), Some("1"));
        assert_eq!(replayed.header_str(header::ORDER_ID).as_deref(), Some("order-1"));
        assert_eq!(replayed.headers.iter().filter(|(n, _)| *n == header::RETRY_ATTEMPT).count(), 1);
        assert_eq!(notifier.count().await, 0);
    }

    #[tokio::test]
    async fn test_attempt_below_ceiling_increments() {
        let (broker, _, reprocessor) = setup().await;
        reprocessor.reprocess(&dead_record(Some("2"))).await.unwrap();
        let replayed = broker.records("stock.result").await;
        assert_eq!(replayed[0].header_str(header::RETRY_ATTEMPT).as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_ceiling_raises_one_alert_without_republish() {
        let (broker, notifier, reprocessor) = setup().await;

        let outcome = reprocessor.reprocess(&dead_record(Some("3"))).await.unwrap();
        assert_eq!(outcome, ReplayOutcome::Alerted { attempt: 3 });
        assert_eq!(broker.record_count("stock.result").await, 0);

        let alerts = notifier.alerts().await;
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.field_value("Topic"), Some("stock.result"));
        assert_eq!(alert.field_value("Key"), Some("order-1"));
        assert_eq!(alert.field_value("OrderId"), Some("order-1"));
        assert_eq!(alert.field_value("Original P/Off"), Some("1 / 77"));
        assert_eq!(alert.field_value("DLT Partition/Offset"), Some("1 / 5"));
        assert_eq!(alert.field_value("Attempts (DLT)"), Some("3 / 3"));
        assert_eq!(alert.field_value("Exception"), Some("invalid_transition"));
        assert!(alert.description.contains("\"status\": \"fail\""));
    }

    #[tokio::test]
    async fn test_missing_forensics_render_as_dash() {
        let (_, notifier, reprocessor) = setup().await;
        let mut record = dead_record(Some("9"));
        record.key = None;
        record.headers.remove(header::DLT_ORIGINAL_OFFSET);
        record.headers.remove(header::DLT_EXCEPTION_MESSAGE);

        reprocessor.reprocess(&record).await.unwrap();
        let alert = &notifier.alerts().await[0];
        assert_eq!(alert.field_value("Key"), Some("-"));
        assert_eq!(alert.field_value("Original P/Off"), Some("1 / -"));
        assert_eq!(alert.field_value("Message"), Some("-"));
    }

    #[tokio::test]
    async fn test_missing_original_topic_is_dropped() {
        let (broker, notifier, reprocessor) = setup().await;
        let mut record = dead_record(None);
        record.headers.remove(header::DLT_ORIGINAL_TOPIC);

        assert_eq!(
            reprocessor.reprocess(&record).await.unwrap(),
            ReplayOutcome::Dropped
        );
        assert_eq!(broker.record_count("stock.result").await, 0);
        assert_eq!(notifier.count().await, 0);
    }

    #[tokio::test]
    async fn test_garbage_retry_header_counts_as_zero() {
        let (broker, _, reprocessor) = setup().await;
        reprocessor
            .reprocess(&dead_record(Some("many")))
            .await
            .unwrap();
        let replayed = broker.records("stock.result").await;
        assert_eq!(replayed[0].header_str(header::RETRY_ATTEMPT).as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_failed_replay_is_transient() {
        let (broker, _, reprocessor) = setup().await;
        broker.set_fail_on_topic("stock.result", true).await;
        let err = reprocessor.reprocess(&dead_record(None)).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_description_is_bounded() {
        let long = format!("\"{}\"", "x".repeat(5000));
        let described = describe_payload(&long);
        assert_eq!(described.chars().count(), 3500);
        assert!(described.ends_with("..."));
    }
}

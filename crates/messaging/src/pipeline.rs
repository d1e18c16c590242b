//! Consumer error pipeline: bounded retries, then dead-letter routing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    BusError, HandlerError, MessageHandler, ProducerRecord, Publisher, Record, dead_letter_topic,
    header,
};

/// Bounded exponential backoff between local retries.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(200),
            multiplier: 2.0,
            max_interval: Duration::from_secs(5),
            max_retries: 3,
        }
    }
}

impl BackoffPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let millis = self.initial_interval.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_interval.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Outcome of running a record through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Handled { attempts: u32 },
    DeadLettered { attempts: u32, error: HandlerError },
}

/// Wraps a handler with local retries and dead-letter routing.
///
/// Transient failures are retried according to the backoff policy; anything
/// else, or a transient failure that exhausts the budget, is published to
/// `<topic>.DLT` on the same partition with forensic headers.
pub struct ErrorPipeline {
    handler: Arc<dyn MessageHandler>,
    publisher: Arc<dyn Publisher>,
    backoff: BackoffPolicy,
}

impl ErrorPipeline {
    pub fn new(
        handler: Arc<dyn MessageHandler>,
        publisher: Arc<dyn Publisher>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            handler,
            publisher,
            backoff,
        }
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Handles a record, retrying and dead-lettering as needed.
    ///
    /// Fails only when the dead-letter publish fails; the record must then
    /// stay uncommitted.
    #[tracing::instrument(skip(self, record), fields(topic = %record.topic, partition = record.partition, offset = record.offset))]
    pub async fn process(&self, record: &Record) -> Result<Disposition, BusError> {
        let mut retries = 0;
        loop {
            let attempts = retries + 1;
            let error = match self.handler.handle(record).await {
                Ok(()) => return Ok(Disposition::Handled { attempts }),
                Err(error) => error,
            };

            if error.is_retryable() && retries < self.backoff.max_retries {
                retries += 1;
                tracing::warn!(
                    retry = retries,
                    max_retries = self.backoff.max_retries,
                    key = ?record.key,
                    error = %error,
                    "Retrying record"
                );
                metrics::counter!("consumer_retries_total", "topic" => record.topic.clone())
                    .increment(1);
                tokio::time::sleep(self.backoff.delay(retries)).await;
                continue;
            }

            self.dead_letter(record, &error).await?;
            return Ok(Disposition::DeadLettered { attempts, error });
        }
    }

    async fn dead_letter(&self, record: &Record, error: &HandlerError) -> Result<(), BusError> {
        let mut headers = record.headers.clone();
        headers.insert(header::DLT_ORIGINAL_TOPIC, record.topic.as_bytes());
        headers.insert(
            header::DLT_ORIGINAL_PARTITION,
            record.partition.to_be_bytes().to_vec(),
        );
        headers.insert(header::DLT_ORIGINAL_OFFSET, record.offset.to_be_bytes().to_vec());
        headers.insert(header::DLT_EXCEPTION_FQCN, error.code.as_bytes());
        headers.insert(header::DLT_EXCEPTION_MESSAGE, error.message.as_bytes());

        let mut dead = ProducerRecord::new(dead_letter_topic(&record.topic), record.payload.clone())
            .with_partition(record.partition)
            .with_headers(headers);
        dead.key = record.key.clone();

        let meta = self.publisher.publish(dead).await?;
        metrics::counter!("dead_lettered_total", "topic" => record.topic.clone()).increment(1);
        tracing::error!(
            key = ?record.key,
            code = %error.code,
            kind = error.kind.as_str(),
            dlt_partition = meta.partition,
            dlt_offset = meta.offset,
            "Record dead-lettered"
        );
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for ErrorPipeline {
    async fn handle(&self, record: &Record) -> Result<(), HandlerError> {
        self.process(record)
            .await
            .map(|_| ())
            .map_err(|e| HandlerError::transient("dead_letter_publish_failed", e.to_string()))
    }
}

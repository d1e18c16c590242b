//! Record and header model shared by producers and consumers.

use chrono::{DateTime, Utc};

/// Well-known header names.
pub mod header {
    /// Correlation key of the order a record belongs to.
    pub const ORDER_ID: &str = "orderId";
    /// Success/failure discriminator or outbound event type.
    pub const EVENT_TYPE: &str = "eventType";
    /// Topic the record was consumed from before dead-lettering.
    pub const DLT_ORIGINAL_TOPIC: &str = "kafka_dlt-original-topic";
    /// Partition the record was consumed from (i32, big-endian).
    pub const DLT_ORIGINAL_PARTITION: &str = "kafka_dlt-original-partition";
    /// Offset the record was consumed at (i64, big-endian).
    pub const DLT_ORIGINAL_OFFSET: &str = "kafka_dlt-original-offset";
    /// Error code of the failure that dead-lettered the record.
    pub const DLT_EXCEPTION_FQCN: &str = "kafka_dlt-exception-fqcn";
    /// Error message of the failure that dead-lettered the record.
    pub const DLT_EXCEPTION_MESSAGE: &str = "kafka_dlt-exception-message";
    /// Legacy partition header written by older producers.
    pub const ORIGINAL_PARTITION: &str = "kafka_original-partition";
    /// Legacy offset header written by older producers.
    pub const ORIGINAL_OFFSET: &str = "kafka_original-offset";
    /// Number of replays from the dead-letter topic (decimal text).
    pub const RETRY_ATTEMPT: &str = "x-retry-attempt";
}

/// Suffix appended to a topic name to form its dead-letter topic.
pub const DEAD_LETTER_SUFFIX: &str = ".DLT";

/// Returns the dead-letter topic for `topic`.
pub fn dead_letter_topic(topic: &str) -> String {
    format!("{topic}{DEAD_LETTER_SUFFIX}")
}

/// Ordered multi-map of header names to raw byte values.
///
/// Lookups return the last value for a name, matching how brokers expose
/// repeated headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, Vec<u8>)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value, keeping earlier values for the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.0.push((name.into(), value.into()));
    }

    /// Replaces every value for `name` with a single value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        let name = name.into();
        self.remove(&name);
        self.0.push((name, value.into()));
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(n, _)| n != name);
    }

    pub fn last(&self, name: &str) -> Option<&[u8]> {
        self.0
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.last(name).is_some()
    }

    /// Last value for `name` decoded as UTF-8.
    pub fn last_str(&self, name: &str) -> Option<String> {
        self.last(name)
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    /// Last value for the first name present, decoded as a big-endian i32.
    pub fn last_i32(&self, names: &[&str]) -> Option<i32> {
        let value = names.iter().find_map(|n| self.last(n))?;
        let bytes: [u8; 4] = value.get(..4)?.try_into().ok()?;
        Some(i32::from_be_bytes(bytes))
    }

    /// Last value for the first name present, decoded as a big-endian i64.
    pub fn last_i64(&self, names: &[&str]) -> Option<i64> {
        let value = names.iter().find_map(|n| self.last(n))?;
        let bytes: [u8; 8] = value.get(..8)?.try_into().ok()?;
        Some(i64::from_be_bytes(bytes))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A record as delivered to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub headers: Headers,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl Record {
    /// Payload decoded as UTF-8, lossy.
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn header_str(&self, name: &str) -> Option<String> {
        self.headers.last_str(name)
    }
}

/// A record to be published.
///
/// Without an explicit partition the broker picks one from the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    pub topic: String,
    pub partition: Option<i32>,
    pub key: Option<String>,
    pub headers: Headers,
    pub payload: Vec<u8>,
}

impl ProducerRecord {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            key: None,
            headers: Headers::new(),
            payload: payload.into(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// Where a published record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMetadata {
    pub partition: i32,
    pub offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_returns_latest_value() {
        let mut headers = Headers::new();
        headers.append("a", "1");
        headers.append("a", "2");
        assert_eq!(headers.last_str("a").as_deref(), Some("2"));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_insert_replaces_all_values() {
        let mut headers = Headers::new();
        headers.append("a", "1");
        headers.append("a", "2");
        headers.insert("a", "3");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.last_str("a").as_deref(), Some("3"));
    }

    #[test]
    fn test_big_endian_accessors() {
        let headers = Headers::new()
            .with(header::DLT_ORIGINAL_PARTITION, 7i32.to_be_bytes().to_vec())
            .with(header::ORIGINAL_OFFSET, 1234i64.to_be_bytes().to_vec());

        assert_eq!(
            headers.last_i32(&[header::DLT_ORIGINAL_PARTITION, header::ORIGINAL_PARTITION]),
            Some(7)
        );
        assert_eq!(
            headers.last_i64(&[header::DLT_ORIGINAL_OFFSET, header::ORIGINAL_OFFSET]),
            Some(1234)
        );
    }

    #[test]
    fn test_short_numeric_header_is_none() {
        let headers = Headers::new().with(header::DLT_ORIGINAL_OFFSET, vec![0u8, 1]);
        assert_eq!(headers.last_i64(&[header::DLT_ORIGINAL_OFFSET]), None);
    }

    #[test]
    fn test_dead_letter_topic_name() {
        assert_eq!(dead_letter_topic("payment.result"), "payment.result.DLT");
    }
}

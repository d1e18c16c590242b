//! Worker configuration loaded from environment variables.

use std::time::Duration;

use messaging::{BackoffPolicy, WebhookConfig, topics::DEFAULT_PARTITIONS};
use outbox::{RelayConfig, RequeueConfig};
use saga::TopicConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Worker configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: health/metrics bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `LOG_FORMAT`: `json` for JSON lines, anything else for text
/// - `DATABASE_URL`: PostgreSQL connection string; in-memory stores when unset
/// - `OUTBOX_RELAY_INTERVAL_MS` (500), `OUTBOX_RELAY_BATCH_SIZE` (200),
///   `OUTBOX_RELAY_LEASE_SECS` (30)
/// - `OUTBOX_REQUEUE_INTERVAL_SECS` (30), `OUTBOX_REQUEUE_OLDER_THAN_SECS` (300)
/// - `CONSUMER_MAX_RETRIES` (3), `DLT_MAX_ATTEMPTS` (3)
/// - `DLT_WEBHOOK_URL`, `DLT_WEBHOOK_TIMEOUT_MS` (5000)
/// - `TOPIC_PARTITIONS` (12)
/// - `TOPIC_VALIDATION_RESULT`, `TOPIC_PAYMENT_RESULT`, `TOPIC_STOCK_RESULT`,
///   `TOPIC_APPROVAL_RESULT`, `TOPIC_ORDER_CANCELED`, `TOPIC_STOCK_REQUEST`,
///   `TOPIC_ORDER_COMPLETED`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub relay: RelayConfig,
    pub requeue: RequeueConfig,
    pub backoff: BackoffPolicy,
    pub dlt_max_attempts: u32,
    pub webhook: WebhookConfig,
    pub partitions: i32,
    pub topics: TopicConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from any key lookup. Unparsable values fall
    /// back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        // Zero-length periods would panic inside `tokio::time::interval`.
        let millis = |key: &str, default: Duration| {
            parsed(key)
                .filter(|n| *n > 0)
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        let secs = |key: &str, default: Duration| {
            parsed(key)
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        let topic = |key: &str, default: String| {
            lookup(key).filter(|v| !v.trim().is_empty()).unwrap_or(default)
        };

        let relay = RelayConfig {
            interval: millis("OUTBOX_RELAY_INTERVAL_MS", defaults.relay.interval),
            batch_size: parsed("OUTBOX_RELAY_BATCH_SIZE")
                .map(|n| n as usize)
                .unwrap_or(defaults.relay.batch_size),
            lease: secs("OUTBOX_RELAY_LEASE_SECS", defaults.relay.lease),
        };
        let requeue = RequeueConfig {
            interval: secs("OUTBOX_REQUEUE_INTERVAL_SECS", defaults.requeue.interval),
            older_than: secs("OUTBOX_REQUEUE_OLDER_THAN_SECS", defaults.requeue.older_than),
        };
        let backoff = BackoffPolicy {
            max_retries: parsed("CONSUMER_MAX_RETRIES")
                .map(|n| n as u32)
                .unwrap_or(defaults.backoff.max_retries),
            ..defaults.backoff
        };
        let webhook = WebhookConfig {
            url: lookup("DLT_WEBHOOK_URL").filter(|u| !u.trim().is_empty()),
            timeout: millis("DLT_WEBHOOK_TIMEOUT_MS", defaults.webhook.timeout),
        };
        let t = defaults.topics;
        let topics = TopicConfig {
            validation_result: topic("TOPIC_VALIDATION_RESULT", t.validation_result),
            payment_result: topic("TOPIC_PAYMENT_RESULT", t.payment_result),
            stock_result: topic("TOPIC_STOCK_RESULT", t.stock_result),
            approval_result: topic("TOPIC_APPROVAL_RESULT", t.approval_result),
            order_canceled: topic("TOPIC_ORDER_CANCELED", t.order_canceled),
            stock_request: topic("TOPIC_STOCK_REQUEST", t.stock_request),
            order_completed: topic("TOPIC_ORDER_COMPLETED", t.order_completed),
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref().map(str::trim) {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: lookup("DATABASE_URL").filter(|u| !u.trim().is_empty()),
            relay,
            requeue,
            backoff,
            dlt_max_attempts: parsed("DLT_MAX_ATTEMPTS")
                .map(|n| n as u32)
                .unwrap_or(defaults.dlt_max_attempts),
            webhook,
            partitions: parsed("TOPIC_PARTITIONS")
                .and_then(|n| i32::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.partitions),
            topics,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            relay: RelayConfig::default(),
            requeue: RequeueConfig::default(),
            backoff: BackoffPolicy::default(),
            dlt_max_attempts: 3,
            webhook: WebhookConfig::default(),
            partitions: DEFAULT_PARTITIONS,
            topics: TopicConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert_eq!(config.relay.interval, Duration::from_millis(500));
        assert_eq!(config.relay.batch_size, 200);
        assert_eq!(config.requeue.interval, Duration::from_secs(30));
        assert_eq!(config.requeue.older_than, Duration::from_secs(300));
        assert_eq!(config.backoff.max_retries, 3);
        assert_eq!(config.dlt_max_attempts, 3);
        assert_eq!(config.partitions, 12);
        assert!(config.webhook.url.is_none());
        assert_eq!(config.topics, TopicConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/orders"),
            ("OUTBOX_RELAY_INTERVAL_MS", "250"),
            ("OUTBOX_RELAY_BATCH_SIZE", "50"),
            ("OUTBOX_REQUEUE_INTERVAL_SECS", "10"),
            ("OUTBOX_REQUEUE_OLDER_THAN_SECS", "60"),
            ("DLT_MAX_ATTEMPTS", "5"),
            ("DLT_WEBHOOK_URL", "https://hooks.example.test/alert"),
            ("TOPIC_PAYMENT_RESULT", "payments.v2"),
        ]));
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/orders"));
        assert_eq!(config.relay.interval, Duration::from_millis(250));
        assert_eq!(config.relay.batch_size, 50);
        assert_eq!(config.requeue.interval, Duration::from_secs(10));
        assert_eq!(config.requeue.older_than, Duration::from_secs(60));
        assert_eq!(config.dlt_max_attempts, 5);
        assert_eq!(
            config.webhook.url.as_deref(),
            Some("https://hooks.example.test/alert")
        );
        assert_eq!(config.topics.payment_result, "payments.v2");
        assert_eq!(config.topics.stock_result, "stock.result");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "http"),
            ("OUTBOX_RELAY_BATCH_SIZE", "-1"),
            ("TOPIC_PARTITIONS", "0"),
            ("OUTBOX_RELAY_INTERVAL_MS", "0"),
            ("OUTBOX_REQUEUE_INTERVAL_SECS", "0"),
            ("DATABASE_URL", "  "),
        ]));
        assert_eq!(config.port, 3000);
        assert_eq!(config.relay.batch_size, 200);
        assert_eq!(config.partitions, 12);
        assert_eq!(config.relay.interval, Duration::from_millis(500));
        assert_eq!(config.requeue.interval, Duration::from_secs(30));
        assert!(config.database_url.is_none());
    }
}

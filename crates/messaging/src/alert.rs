//! Operator alerts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::text::cut;
use serde_json::{Value, json};
use tokio::sync::Mutex;

/// Default embed color (red).
pub const ALERT_COLOR: u32 = 0xE74C3C;

const TITLE_LIMIT: usize = 256;
const DESCRIPTION_LIMIT: usize = 3800;
const FIELD_NAME_LIMIT: usize = 256;
const FIELD_VALUE_LIMIT: usize = 1024;
const FOOTER: &str = "Kafka DLT Monitor";

/// An operator-facing alert: title, free-text description and ordered
/// key/value fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub description: String,
    pub fields: Vec<(String, String)>,
    pub color: u32,
}

impl Alert {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            fields: Vec::new(),
            color: ALERT_COLOR,
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Value of the first field called `name`.
    pub fn field_value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Delivers alerts to operators.
///
/// Delivery never fails from the caller's point of view; implementations log
/// their own errors.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, alert: &Alert);
}

fn looks_like_json(s: &str) -> bool {
    let s = s.trim();
    (s.starts_with('{') && s.ends_with('}')) || (s.starts_with('[') && s.ends_with(']'))
}

fn fence(s: &str) -> String {
    if s.trim().is_empty() {
        return String::new();
    }
    let lang = if looks_like_json(s) { "json" } else { "" };
    format!("```{lang}\n{s}```")
}

/// Builds the chat-ops webhook body for an alert.
pub fn embed_body(alert: &Alert) -> Value {
    let fields: Vec<Value> = alert
        .fields
        .iter()
        .map(|(name, value)| {
            json!({
                "name": cut(name, FIELD_NAME_LIMIT),
                "value": cut(value, FIELD_VALUE_LIMIT),
                "inline": true,
            })
        })
        .collect();

    let color = if alert.color == 0 {
        ALERT_COLOR
    } else {
        alert.color
    };

    let mut embed = json!({
        "title": cut(&alert.title, TITLE_LIMIT),
        "description": fence(&cut(&alert.description, DESCRIPTION_LIMIT)),
        "color": color,
        "timestamp": Utc::now().to_rfc3339(),
        "footer": { "text": FOOTER },
    });
    if !fields.is_empty() {
        embed["fields"] = Value::Array(fields);
    }

    json!({ "content": "", "embeds": [embed] })
}

/// Webhook settings.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Target URL. Alerts are skipped when unset.
    pub url: Option<String>,
    pub timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Posts alerts as chat-ops embeds.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        let url = config.url.filter(|u| !u.trim().is_empty());
        Ok(Self { client, url })
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    async fn post(&self, url: &str, alert: &Alert) -> Result<(), reqwest::Error> {
        self.client
            .post(url)
            .json(&embed_body(alert))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl AlertNotifier for WebhookNotifier {
    async fn notify(&self, alert: &Alert) {
        let Some(url) = self.url.as_deref() else {
            tracing::warn!(title = %alert.title, "Webhook URL not configured; skipping alert");
            return;
        };
        match self.post(url, alert).await {
            Ok(()) => tracing::info!(title = %alert.title, "Alert delivered"),
            Err(error) => tracing::error!(title = %alert.title, error = %error, "Failed to deliver alert"),
        }
    }
}

/// Keeps alerts in memory.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.alerts.lock().await.len()
    }
}

#[async_trait]
impl AlertNotifier for RecordingNotifier {
    async fn notify(&self, alert: &Alert) {
        self.alerts.lock().await.push(alert.clone());
    }
}

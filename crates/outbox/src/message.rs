use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::OutboxError;

/// Column limit of `last_error`.
pub const MAX_ERROR_LEN: usize = 512;

/// Unique identifier of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutboxId(Uuid);

impl OutboxId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OutboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OutboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery status of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "SENT" => Ok(OutboxStatus::Sent),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(OutboxError::InvalidData(format!(
                "unknown outbox status {other}"
            ))),
        }
    }
}

/// One promise to deliver one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: OutboxId,
    /// Order the event belongs to; also the record key.
    pub aggregate_id: OrderId,
    pub topic: String,
    pub event_type: String,
    /// Serialized event body, opaque to the outbox.
    pub payload: String,
    pub status: OutboxStatus,
    pub last_error: Option<String>,
    /// Lease of the relay currently publishing this row.
    pub claimed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxMessage {
    /// A new `PENDING` row.
    pub fn pending(
        aggregate_id: OrderId,
        topic: impl Into<String>,
        event_type: impl Into<String>,
        payload: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OutboxId::new(),
            aggregate_id,
            topic: topic.into(),
            event_type: event_type.into(),
            payload: payload.into(),
            status: OutboxStatus::Pending,
            last_error: None,
            claimed_until: None,
            created_at: at,
            updated_at: at,
        }
    }

    /// Attaches a diagnostic recorded at enqueue time.
    pub fn with_last_error(mut self, error: Option<String>) -> Self {
        self.last_error = error.map(|e| common::text::abbreviate(&e, MAX_ERROR_LEN));
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }

    /// True when pending and not leased to a live relay at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.claimed_until.is_none_or(|until| until <= now)
    }
}

//! Append-only order history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const HISTORY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One recorded step of an order's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub label: String,
    pub at: DateTime<Utc>,
}

/// Timestamped log of status changes and stage completions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderHistory(Vec<HistoryEntry>);

impl OrderHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<HistoryEntry>) -> Self {
        Self(entries)
    }

    pub fn push(&mut self, label: impl Into<String>, at: DateTime<Utc>) {
        self.0.push(HistoryEntry {
            label: label.into(),
            at,
        });
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.0
    }

    pub fn labels(&self) -> Vec<&str> {
        self.0.iter().map(|e| e.label.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Renders one `label:yyyy-MM-dd HH:mm:ss` line per entry.
    pub fn render(&self) -> String {
        self.0
            .iter()
            .map(|e| format!("{}:{}", e.label, e.at.format(HISTORY_TIME_FORMAT)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

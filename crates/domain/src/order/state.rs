//! Order status state machine.

use serde::{Deserialize, Serialize};

/// The primary lifecycle status of an order.
///
/// State transitions:
/// ```text
/// Pending ──► ReadyForStock ──► StockRequested ──► AcceptedReady ──► Accepted ──► Completed
///    │              │                 │                  │              │
///    └──────────────┴─────────────────┴──────────────────┴──────────────┴──► Canceled | Rejected | Failed
///
/// Pending, Accepted ──► Refunded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created, waiting for validation and payment results.
    #[default]
    Pending,

    /// Validation and payment both succeeded.
    ReadyForStock,

    /// The stock-decrease request has been enqueued.
    StockRequested,

    /// Stock was reserved, waiting for the merchant decision.
    AcceptedReady,

    /// The merchant accepted the order.
    Accepted,

    /// Fulfilled (terminal state).
    Completed,

    /// Canceled by a failed saga step (terminal state).
    Canceled,

    /// Rejected by the merchant (terminal state).
    Rejected,

    /// Failed for a reason outside the saga steps (terminal state).
    Failed,

    /// Refunded (terminal state).
    Refunded,
}

impl OrderStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [OrderStatus; 10] = [
        OrderStatus::Pending,
        OrderStatus::ReadyForStock,
        OrderStatus::StockRequested,
        OrderStatus::AcceptedReady,
        OrderStatus::Accepted,
        OrderStatus::Completed,
        OrderStatus::Canceled,
        OrderStatus::Rejected,
        OrderStatus::Failed,
        OrderStatus::Refunded,
    ];

    /// Returns true if `next` is reachable from this status in one step.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        if self.is_terminal() {
            return false;
        }
        if next.is_failure() {
            return true;
        }
        matches!(
            (self, next),
            (Pending, ReadyForStock)
                | (ReadyForStock, StockRequested)
                | (StockRequested, AcceptedReady)
                | (AcceptedReady, Accepted)
                | (Accepted, Completed)
                | (Pending, Refunded)
                | (Accepted, Refunded)
        )
    }

    /// Returns true for the failure outcomes (Canceled, Rejected, Failed).
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Failed
        )
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        self.is_failure() || matches!(self, OrderStatus::Completed | OrderStatus::Refunded)
    }

    /// Returns the status name as stored and published.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::ReadyForStock => "READY_FOR_STOCK",
            OrderStatus::StockRequested => "STOCK_REQUESTED",
            OrderStatus::AcceptedReady => "ACCEPTED_READY",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown order status: {s}"))
    }
}

/// Outcome of one upstream stage (validation or payment).
///
/// Tracked independently of [`OrderStatus`] so the two results can arrive in
/// either order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    #[default]
    Pending,
    Succeeded,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "PENDING",
            StageStatus::Succeeded => "SUCCEEDED",
            StageStatus::Failed => "FAILED",
        }
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, StageStatus::Succeeded)
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(StageStatus::Pending),
            "SUCCEEDED" => Ok(StageStatus::Succeeded),
            "FAILED" => Ok(StageStatus::Failed),
            other => Err(format!("unknown stage status: {other}")),
        }
    }
}

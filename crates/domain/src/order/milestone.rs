//! Externally visible outcomes of order transitions.
//!
//! A milestone is what the saga announces to other services. The domain only
//! says *that* something must be announced; topics and payload encoding are
//! decided by the saga layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MenuId, Money, OrderStatus, StoreId};

/// Why an order left the happy path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    ValidationFailed,
    PaymentFailed,
    StockFailed,
    AcceptFailed,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::ValidationFailed => "VALIDATION_FAILED",
            CancelReason::PaymentFailed => "PAYMENT_FAILED",
            CancelReason::StockFailed => "STOCK_FAILED",
            CancelReason::AcceptFailed => "ACCEPT_FAILED",
        }
    }
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One menu/quantity pair of a stock-decrease request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub menu_id: MenuId,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Milestone {
    /// The order reached a failure state.
    Canceled {
        reason: CancelReason,
        status: OrderStatus,
        occurred_at: DateTime<Utc>,
        /// Diagnostic carried by the failing upstream event, if any.
        error: Option<String>,
    },

    /// Stock must be decreased for these lines.
    StockRequested { lines: Vec<StockLine> },

    /// The merchant accepted the order.
    Completed {
        store_id: StoreId,
        total_price: Money,
        ordered_at: DateTime<Utc>,
    },
}

impl Milestone {
    pub fn name(&self) -> &'static str {
        match self {
            Milestone::Canceled { .. } => "canceled",
            Milestone::StockRequested { .. } => "stock_requested",
            Milestone::Completed { .. } => "completed",
        }
    }
}

/// Result of applying one inbound result to an order.
///
/// `changed == false` means the event was a duplicate or arrived after the
/// order reached a terminal state; nothing must be written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transition {
    changed: bool,
    milestones: Vec<Milestone>,
}

impl Transition {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn changed() -> Self {
        Self {
            changed: true,
            milestones: Vec::new(),
        }
    }

    pub fn push(&mut self, milestone: Milestone) {
        self.changed = true;
        self.milestones.push(milestone);
    }

    pub fn with(mut self, milestone: Milestone) -> Self {
        self.push(milestone);
        self
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn milestones(&self) -> &[Milestone] {
        &self.milestones
    }

    pub fn into_milestones(self) -> Vec<Milestone> {
        self.milestones
    }
}

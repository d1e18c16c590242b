//! Order aggregate and related types.

mod aggregate;
mod history;
mod milestone;
mod state;
mod value_objects;

pub use aggregate::{NewOrder, Order, OrderRecord};
pub use history::{HistoryEntry, OrderHistory};
pub use milestone::{CancelReason, Milestone, StockLine, Transition};
pub use state::{OrderStatus, StageStatus};
pub use value_objects::{
    MenuId, Money, OrderChannel, OrderItem, OrderItemId, PaymentMethod, ReceiptMethod, StoreId,
};

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The requested transition is not in the status table.
    #[error("Invalid state transition: cannot {action} from {current} state")]
    InvalidStateTransition {
        current: OrderStatus,
        action: &'static str,
    },

    /// Invalid quantity.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Invalid price.
    #[error("Invalid price: {price} (must not be negative)")]
    InvalidPrice { price: i64 },

    /// Validation result carried no items.
    #[error("Order has no items")]
    NoItems,

    /// The refund window is closed.
    #[error("Order is no longer refundable")]
    NotRefundable,
}

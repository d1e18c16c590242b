//! Domain layer for the order fulfillment saga.
//!
//! The [`Order`] aggregate owns the fulfillment state machine. Its transition
//! methods are pure: they mutate the in-memory aggregate and report which
//! milestones must be announced, leaving persistence and messaging to the
//! saga crate.

pub mod order;

pub use order::{
    CancelReason, HistoryEntry, MenuId, Milestone, Money, NewOrder, Order, OrderChannel,
    OrderError, OrderHistory, OrderItem, OrderItemId, OrderRecord, OrderStatus, PaymentMethod,
    ReceiptMethod, StageStatus, StockLine, StoreId, Transition,
};

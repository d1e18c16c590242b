//! Saga error types.

use common::{OrderId, Version};
use domain::OrderError;
use messaging::{ErrorKind, HandlerError};
use outbox::OutboxError;
use thiserror::Error;

/// Errors that can occur while applying inbound events.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The inbound record could not be decoded.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// No order has this id.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// An order with this id already exists.
    #[error("Order already exists: {0}")]
    OrderExists(OrderId),

    /// The order changed since it was loaded.
    #[error(
        "Concurrency conflict for order {order_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        order_id: OrderId,
        expected: Version,
        actual: Version,
    },

    /// Domain rule violation.
    #[error("Domain error: {0}")]
    Domain(#[from] OrderError),

    /// A stored value could not be decoded.
    #[error("Invalid stored value: {0}")]
    InvalidData(String),

    /// The store is temporarily unavailable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Outbox error.
    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// How the consumer error pipeline must treat this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::Malformed(_) | SagaError::Serialization(_) => ErrorKind::Malformed,
            SagaError::OrderNotFound(_)
            | SagaError::OrderExists(_)
            | SagaError::Domain(_)
            | SagaError::InvalidData(_) => ErrorKind::Business,
            SagaError::ConcurrencyConflict { .. }
            | SagaError::Unavailable(_)
            | SagaError::Database(_)
            | SagaError::Outbox(_) => ErrorKind::Transient,
        }
    }

    /// Stable code written into dead-letter headers.
    pub fn code(&self) -> &'static str {
        match self {
            SagaError::Malformed(_) => "malformed_message",
            SagaError::OrderNotFound(_) => "order_not_found",
            SagaError::OrderExists(_) => "order_exists",
            SagaError::ConcurrencyConflict { .. } => "concurrency_conflict",
            SagaError::Domain(OrderError::InvalidStateTransition { .. }) => "invalid_transition",
            SagaError::Domain(_) => "order_rule_violation",
            SagaError::InvalidData(_) => "invalid_stored_data",
            SagaError::Unavailable(_) => "store_unavailable",
            SagaError::Database(_) => "database_error",
            SagaError::Outbox(_) => "outbox_error",
            SagaError::Serialization(_) => "serialization_error",
        }
    }
}

impl From<SagaError> for HandlerError {
    fn from(error: SagaError) -> Self {
        HandlerError::new(error.kind(), error.code(), error.to_string())
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

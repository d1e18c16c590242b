use thiserror::Error;

use crate::OutboxId;

/// Errors that can occur when interacting with the outbox.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// No outbox row has this id.
    #[error("Outbox message not found: {0}")]
    NotFound(OutboxId),

    /// A stored value could not be decoded.
    #[error("Invalid stored value: {0}")]
    InvalidData(String),

    /// The store is temporarily unavailable.
    #[error("Outbox store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;

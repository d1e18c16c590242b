//! Worker startup errors.

use messaging::BusError;
use thiserror::Error;

/// Errors that abort worker startup.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Topic provisioning failed: {0}")]
    Provisioning(#[from] BusError),

    #[error("Webhook client error: {0}")]
    Webhook(#[from] reqwest::Error),

    #[error("Metrics recorder error: {0}")]
    Metrics(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

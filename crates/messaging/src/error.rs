use thiserror::Error;

/// Errors raised by broker clients.
#[derive(Debug, Error)]
pub enum BusError {
    /// The topic has not been provisioned.
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// The partition does not exist on the topic.
    #[error("Unknown partition {partition} for topic {topic}")]
    UnknownPartition { topic: String, partition: i32 },

    /// The topic specification cannot be provisioned.
    #[error("Invalid topic {topic}: {reason}")]
    InvalidTopic { topic: String, reason: String },

    /// The broker could not be reached or refused the request.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// The request did not complete within the client timeout.
    #[error("Broker request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl BusError {
    /// Returns true for failures that may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BusError::Unavailable(_) | BusError::Timeout(_))
    }
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

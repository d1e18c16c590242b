//! Message handler seam and the typed error it reports.

use async_trait::async_trait;

use crate::Record;

/// How the error pipeline must treat a handler failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Infrastructure failure (timeout, unavailable store, lost race). Retried.
    Transient,
    /// The record itself is defective. Dead-lettered immediately.
    Malformed,
    /// A business rule rejected the record. Dead-lettered immediately.
    Business,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Malformed => "malformed",
            ErrorKind::Business => "business",
        }
    }
}

/// Failure reported by a [`MessageHandler`].
///
/// `code` identifies the failure class and is carried in dead-letter
/// headers, so keep it stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
}

impl HandlerError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, code, message)
    }

    pub fn malformed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Malformed, code, message)
    }

    pub fn business(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Business, code, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]: {}", self.code, self.kind.as_str(), self.message)
    }
}

impl std::error::Error for HandlerError {}

/// Processes one consumed record.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, record: &Record) -> Result<(), HandlerError>;
}

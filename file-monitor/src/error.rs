//! Error types for the file monitor.

use thiserror::Error;

use crate::event::WatchId;

/// Result type alias for file monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors that can occur in the file monitor.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Malformed input at a registration call site.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine or the owning service was destroyed while the operation
    /// was outstanding.
    #[error("operation cancelled")]
    Cancelled,

    /// No watch is registered under this id.
    #[error("watch not found: {0}")]
    NotFound(WatchId),

    /// Notify backend error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl MonitorError {
    /// Whether this error reports cancellation rather than a real failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

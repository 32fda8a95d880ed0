//! Common error types for Tether.

use thiserror::Error;

/// Top-level error type for Tether operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Network transport failed (timeout, DNS, connection reset).
    #[error("Network error: {0}")]
    Network(String),

    /// Backend rejected the operation (validation or permission).
    #[error("Rejected by backend: {0}")]
    Rejected(String),

    /// Local storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

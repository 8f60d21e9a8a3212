//! Common error types for Inkboard.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification code attached to failures reported by the remote side.
///
/// The retry executor decides on these codes alone, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Remote session invalid or expired.
    AuthFailed,
    /// Payload rejected by the remote.
    InvalidData,
    /// Remote quota exceeded.
    StorageFull,
    /// Transient transport failure.
    NetworkError,
    /// Remote asked us to slow down.
    RateLimited,
    /// Anything else.
    Unknown,
}

impl ErrorCode {
    /// Stable string form, matching the serialized representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthFailed => "AUTH_FAILED",
            Self::InvalidData => "INVALID_DATA",
            Self::StorageFull => "STORAGE_FULL",
            Self::NetworkError => "NETWORK_ERROR",
            Self::RateLimited => "RATE_LIMITED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for Inkboard operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Remote call failed with a classified code.
    #[error("Remote error ({code}): {message}")]
    Remote { code: ErrorCode, message: String },

    /// File storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Local database operation failed.
    #[error("Database error: {0}")]
    Database(String),

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

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Another exclusive operation is already running.
    #[error("Busy: {0}")]
    Busy(String),

    /// Archive or payload uses a format this build cannot read.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

impl Error {
    /// Build a remote error with the given code.
    pub fn remote(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }

    /// The remote classification code, if this error carries one.
    ///
    /// Uncoded errors return `None` and are treated as retryable.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

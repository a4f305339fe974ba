//! Common error types for HealthSync.

use thiserror::Error;

/// Storage code attached to failures raised by a panicking collaborator.
pub const EXCEPTION_CODE: &str = "EXCEPTION";

/// Storage code for credentials that were permanently revoked.
pub const AUTH_REVOKED_CODE: &str = "AUTH_REVOKED";

/// Top-level error type for HealthSync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport unreachable. Always retryable.
    #[error("Network error: {0}")]
    Network(String),

    /// Remote API rejected the request or answered with something unusable.
    #[error("Storage error [{code}]: {message}")]
    Storage { code: String, message: String },

    /// Nothing matched the export filters, or the request is otherwise unusable.
    #[error("Validation error: {0}")]
    Validation(String),

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

impl Error {
    /// Build a storage error with the given code.
    pub fn storage(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Storage error recorded when a collaborator panicked mid-attempt.
    pub fn exception(message: impl Into<String>) -> Self {
        Self::storage(EXCEPTION_CODE, message)
    }

    /// Code of a storage error, if this is one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Storage { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether a later attempt could succeed without user intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Io(_) => true,
            Self::Storage { code, .. } => code != AUTH_REVOKED_CODE,
            Self::Validation(_)
            | Self::Serialization(_)
            | Self::InvalidInput(_)
            | Self::NotFound(_) => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

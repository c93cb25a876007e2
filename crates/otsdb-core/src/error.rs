//! Core error type for the OpenTSDB client.
//!
//! Adapter crates return `CoreError` directly; the binary wraps it in `anyhow`.

use thiserror::Error;

/// Core layer error.
#[derive(Debug, Error)]
pub enum CoreError {
    /// JSON serialization/deserialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration value
    #[error("config error: {0}")]
    Config(String),

    /// Malformed caller input, raised before any I/O and never retried
    #[error("invalid {field}: {message}")]
    Validation {
        /// Offending field
        field: String,
        /// Reason
        message: String,
    },

    /// Resource not found (404)
    #[error("{resource_type} not found: {id}")]
    NotFound {
        /// Resource kind (e.g. "endpoint", "metric")
        resource_type: String,
        /// Resource identifier
        id: String,
    },

    /// Transport failure (connection refused, timeout, broken socket)
    #[error("network error: {0}")]
    Network(String),

    /// Server temporarily unavailable (503)
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Non-success response or an OpenTSDB error body
    #[error("OpenTSDB error ({status}): {message}")]
    Server {
        /// HTTP status code reported by the TSD
        status: u16,
        /// Error message from the response body
        message: String,
    },

    /// Unexpected internal state
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Shorthand for a [`CoreError::Validation`].
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether a retry may succeed where this attempt failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Network(_) | CoreError::ServiceUnavailable(_) | CoreError::Io(_)
        )
    }
}

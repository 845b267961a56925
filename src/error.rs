//! Error types for feed-relay.

use thiserror::Error;

/// Common error type for feed-relay.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Database error.
    ///
    /// Errors from sqlx are converted into this variant.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error (client construction, not per-request failures).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Validation error for caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for RelayError {
    fn from(e: sqlx::Error) -> Self {
        RelayError::Database(e.to_string())
    }
}

/// Result type alias for feed-relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

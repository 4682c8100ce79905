//! Error types for the training-feedback pipeline.
//!
//! Library code returns [`FeedbackError`] through the crate-wide [`Result`]
//! alias. The `tfb` binary wraps these in `anyhow` at the command boundary.

use thiserror::Error;

/// Main error type for feedback-loop operations.
#[derive(Error, Debug)]
pub enum FeedbackError {
    /// A correction payload is malformed for its declared kind.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The embedding provider failed or returned an unusable response.
    #[error("External service error: {0}")]
    ExternalService(String),

    /// SQLite operation failed.
    #[error("Storage error: {0}")]
    Database(#[from] sqlx::Error),

    /// Non-SQL storage failure (in-memory backend, row decoding).
    #[error("Storage error: {0}")]
    Storage(String),

    /// A referenced row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization of a stored payload failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for feedback-loop operations.
pub type Result<T> = std::result::Result<T, FeedbackError>;

impl From<reqwest::Error> for FeedbackError {
    fn from(err: reqwest::Error) -> Self {
        FeedbackError::ExternalService(err.to_string())
    }
}

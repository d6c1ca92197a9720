//! Error types for the notifications domain.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Errors that can occur in the notifications domain.
///
/// Ordinary provider rejections are not errors: adapters record them on the
/// notification itself (`NotificationState::Error` plus an error message).
/// These variants cover caller-visible failures only.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Referenced adapter name has no registered implementation.
    #[error("Unknown delivery adapter: {0}")]
    UnknownAdapter(String),

    /// Mandatory fields are missing or invalid at save time.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// An attachment path is not a readable regular file.
    #[error("Attachment not found or not readable: {}", .0.display())]
    AttachmentNotFound(PathBuf),

    /// Record store write or query failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Adapter-internal programming or transport error surfaced past the
    /// adapter boundary (never used for ordinary delivery rejections).
    #[error("Provider error: {0}")]
    Provider(String),

    /// A provider call exceeded the configured send timeout.
    #[error("Send timed out after {0}s")]
    Timeout(u64),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for NotificationError {
    fn from(err: reqwest::Error) -> Self {
        NotificationError::Provider(err.to_string())
    }
}

impl From<serde_json::Error> for NotificationError {
    fn from(err: serde_json::Error) -> Self {
        NotificationError::Internal(format!("JSON serialization error: {}", err))
    }
}

impl From<core_config::ConfigError> for NotificationError {
    fn from(err: core_config::ConfigError) -> Self {
        NotificationError::Config(err.to_string())
    }
}

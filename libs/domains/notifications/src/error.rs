//! Error types for the notifications domain.

use crate::models::Channel;
use core_config::ConfigError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Errors that can occur in the notifications domain.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// A store read or write failed, or affected an unexpected number of rows.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A claim batch flipped a different number of rows than it selected.
    /// The batch was rolled back and may be retried immediately.
    #[error("Claim inconsistency: expected {expected} rows, {actual} affected")]
    ClaimInconsistency { expected: u64, actual: u64 },

    /// A channel's send capability failed; the channel stays claimed.
    #[error("{channel} send failed: {message}")]
    SendFailure { channel: Channel, message: String },

    #[error("Notification not found: {0}")]
    NotFound(Uuid),

    /// The requested channel state change is not allowed from the current state.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Invalid notification: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Reply token error: {0}")]
    ReplyToken(String),

    /// An inbound mail event could not be decoded.
    #[error("Inbound mail error: {0}")]
    InboundParse(String),

    /// Transport-level failure inside an email or SMS provider.
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl NotificationError {
    pub fn send_failure(channel: Channel, message: impl Into<String>) -> Self {
        NotificationError::SendFailure {
            channel,
            message: message.into(),
        }
    }
}

impl From<sea_orm::DbErr> for NotificationError {
    fn from(err: sea_orm::DbErr) -> Self {
        NotificationError::Persistence(err.to_string())
    }
}

impl From<reqwest::Error> for NotificationError {
    fn from(err: reqwest::Error) -> Self {
        NotificationError::Provider(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for NotificationError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        NotificationError::ReplyToken(err.to_string())
    }
}

impl From<ConfigError> for NotificationError {
    fn from(err: ConfigError) -> Self {
        NotificationError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for NotificationError {
    fn from(err: validator::ValidationErrors) -> Self {
        NotificationError::Validation(err.to_string())
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for NotificationError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        NotificationError::Scheduler(err.to_string())
    }
}

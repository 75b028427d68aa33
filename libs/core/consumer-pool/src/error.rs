//! Consumer pool error types

use thiserror::Error;

pub type PoolResult<T> = Result<T, PoolError>;

#[derive(Error, Debug)]
pub enum PoolError {
    /// Receive or delete against the external queue failed
    #[error("Queue error: {0}")]
    Queue(String),

    /// An item's payload could not be turned into an event
    #[error("Decode error: {0}")]
    Decode(String),

    /// The handler reported a failure for one item
    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PoolError {
    pub fn handler(message: impl Into<String>) -> Self {
        PoolError::Handler(message.into())
    }

    pub fn queue(message: impl Into<String>) -> Self {
        PoolError::Queue(message.into())
    }
}

impl From<redis::RedisError> for PoolError {
    fn from(err: redis::RedisError) -> Self {
        PoolError::Queue(err.to_string())
    }
}

impl From<serde_json::Error> for PoolError {
    fn from(err: serde_json::Error) -> Self {
        PoolError::Decode(err.to_string())
    }
}

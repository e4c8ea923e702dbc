//! Queue error types.

use thiserror::Error;
use vtx_models::ErrorKind;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("Duplicate job: {0}")]
    Duplicate(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn enqueue_failed(msg: impl Into<String>) -> Self {
        Self::EnqueueFailed(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::Redis(e)
                if e.is_timeout() || e.is_connection_dropped() || e.is_io_error() =>
            {
                ErrorKind::TransientIo
            }
            QueueError::ConnectionFailed(_) | QueueError::EnqueueFailed(_) => {
                ErrorKind::TransientIo
            }
            QueueError::Redis(_) | QueueError::Duplicate(_) | QueueError::Json(_) => {
                ErrorKind::InvariantViolation
            }
        }
    }
}

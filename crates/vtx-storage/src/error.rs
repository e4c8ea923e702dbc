//! Storage error types.

use thiserror::Error;
use vtx_models::ErrorKind;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to configure storage client: {0}")]
    ConfigError(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Precondition failed for {0}")]
    PreconditionFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("List failed: {0}")]
    ListFailed(String),

    #[error("Throttled by storage backend: {0}")]
    Throttled(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Corrupt record at {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("Lease lost for job {0}")]
    LeaseLost(String),

    #[error("Checkpoint for job {job_id} cannot move from {current} back to {attempted}")]
    CheckpointRegression {
        job_id: String,
        current: u64,
        attempted: u64,
    },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn delete_failed(msg: impl Into<String>) -> Self {
        Self::DeleteFailed(msg.into())
    }

    pub fn corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Classification used by the retry layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::UploadFailed(_)
            | StorageError::DownloadFailed(_)
            | StorageError::DeleteFailed(_)
            | StorageError::ListFailed(_)
            | StorageError::Io(_) => ErrorKind::TransientIo,
            StorageError::Throttled(_) => ErrorKind::QuotaExceeded,
            StorageError::LeaseLost(_) => ErrorKind::LeaseLost,
            StorageError::ConfigError(_)
            | StorageError::NotFound(_)
            | StorageError::PreconditionFailed(_)
            | StorageError::Rejected(_)
            | StorageError::Corrupt { .. }
            | StorageError::CheckpointRegression { .. }
            | StorageError::InvalidKey(_)
            | StorageError::Json(_) => ErrorKind::InvariantViolation,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(StorageError::upload_failed("reset").kind(), ErrorKind::TransientIo);
        assert_eq!(StorageError::Throttled("slow down".into()).kind(), ErrorKind::QuotaExceeded);
        assert_eq!(
            StorageError::corrupt("jobs/a/job.json", "bad json").kind(),
            ErrorKind::InvariantViolation
        );
        assert!(!StorageError::Rejected("403".into()).is_retryable());
        assert_eq!(StorageError::LeaseLost("j".into()).kind(), ErrorKind::LeaseLost);
    }
}

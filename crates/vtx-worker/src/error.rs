//! Pipeline error classification.
//!
//! Every failure is tagged with an `ErrorKind` where it happens. Retry and
//! routing decisions read the tag and never look at the message.

use thiserror::Error;
use vtx_models::{ErrorKind, InvalidTransition, JobStage, ManifestError};

pub type PipelineResult<T> = Result<T, PipelineError>;

/// A classified pipeline failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientIo, message)
    }

    pub fn source_unreadable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SourceUnreadable, message)
    }

    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExceeded, message)
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvariantViolation, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    pub fn lease_lost(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LeaseLost, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Prefix the message with the failing operation.
    pub fn context(mut self, operation: &str) -> Self {
        self.message = format!("{}: {}", operation, self.message);
        self
    }
}

/// Terminal stage for a failure that ends a run.
///
/// Exhausted retryable failures are automated failures. Unreadable sources
/// and broken invariants need a person to look at them. Cancellation and
/// lease loss end the run without touching the job.
pub fn terminal_stage_for(kind: ErrorKind) -> Option<JobStage> {
    match kind {
        ErrorKind::TransientIo | ErrorKind::QuotaExceeded => Some(JobStage::Failed),
        ErrorKind::SourceUnreadable | ErrorKind::InvariantViolation => {
            Some(JobStage::ManualReview)
        }
        ErrorKind::Cancelled | ErrorKind::LeaseLost => None,
    }
}

impl From<vtx_storage::StorageError> for PipelineError {
    fn from(e: vtx_storage::StorageError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<vtx_media::MediaError> for PipelineError {
    fn from(e: vtx_media::MediaError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<vtx_queue::QueueError> for PipelineError {
    fn from(e: vtx_queue::QueueError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<InvalidTransition> for PipelineError {
    fn from(e: InvalidTransition) -> Self {
        Self::invariant(e.to_string())
    }
}

impl From<ManifestError> for PipelineError {
    fn from(e: ManifestError) -> Self {
        Self::invariant(e.to_string())
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            Self::cancelled()
        } else {
            Self::invariant(format!("worker task panicked: {}", e))
        }
    }
}

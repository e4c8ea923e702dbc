//! Failure classification shared by every pipeline layer.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind tag attached to a failure where it happens.
///
/// The tag travels with the error; nothing downstream re-derives it from the
/// error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeouts, connection resets, 5xx responses, cold starts.
    TransientIo,
    /// Source cannot be decoded (corrupt, missing, unsupported).
    SourceUnreadable,
    /// Rate limiting or quota rejection from a collaborator.
    QuotaExceeded,
    /// Internal inconsistency, e.g. checkpoint ahead of the plan.
    InvariantViolation,
    /// Run aborted by an external signal.
    Cancelled,
    /// Another worker owns the job now.
    LeaseLost,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::SourceUnreadable => "source_unreadable",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::InvariantViolation => "invariant_violation",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::LeaseLost => "lease_lost",
        }
    }

    /// Whether an operation failing with this kind may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransientIo | ErrorKind::QuotaExceeded)
    }

    /// Whether this kind ends the current run without touching the job's stage.
    ///
    /// The job stays resumable by the next lease holder.
    pub fn is_interruption(&self) -> bool {
        matches!(self, ErrorKind::Cancelled | ErrorKind::LeaseLost)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

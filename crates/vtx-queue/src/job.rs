//! Queue payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vtx_models::JobId;

/// Request to run (or resume) the conversion pipeline for a job.
///
/// The payload only names the job; the job record, plan and checkpoint live
/// in durable storage, so a redelivered message always resumes from the
/// latest checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertVideoJob {
    pub job_id: JobId,
    pub enqueued_at: DateTime<Utc>,
}

impl ConvertVideoJob {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            enqueued_at: Utc::now(),
        }
    }

    /// Key used to drop duplicate enqueues of the same job.
    pub fn idempotency_key(&self) -> String {
        format!("convert:{}", self.job_id)
    }
}

/// A message handed to a consumer; must be acked once handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: String,
    pub job: ConvertVideoJob,
}

//! Structured job logging.
//!
//! Every line carries the job id and the worker holding it, so the history
//! of a job across workers can be pulled out of the aggregated logs.

use tracing::{error, info, warn, Span};
use vtx_models::{ErrorKind, FrameRange, JobId, JobStage};

/// Lifecycle logger for one run of one job.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    worker_id: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId, worker_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            worker_id: worker_id.to_string(),
        }
    }

    pub fn log_start(&self, resume_frame: u64, total_frames: u64) {
        info!(
            job_id = %self.job_id,
            worker_id = %self.worker_id,
            resume_frame,
            total_frames,
            "Job run started"
        );
    }

    pub fn log_stage(&self, from: JobStage, to: JobStage) {
        info!(
            job_id = %self.job_id,
            worker_id = %self.worker_id,
            from = %from,
            to = %to,
            "Stage transition"
        );
    }

    /// One batch committed: pages durable and checkpoint advanced.
    pub fn log_batch(&self, batch: FrameRange, pages: u64, last_completed_frame: u64) {
        info!(
            job_id = %self.job_id,
            worker_id = %self.worker_id,
            batch = %batch,
            pages,
            checkpoint = last_completed_frame,
            "Batch committed"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            worker_id = %self.worker_id,
            "Job warning: {}", message
        );
    }

    /// Run ended with a classified failure.
    pub fn log_failure(&self, kind: ErrorKind, routed_to: Option<JobStage>, message: &str) {
        match routed_to {
            Some(stage) => error!(
                job_id = %self.job_id,
                worker_id = %self.worker_id,
                error_kind = %kind,
                stage = %stage,
                "Job failed: {}", message
            ),
            None => warn!(
                job_id = %self.job_id,
                worker_id = %self.worker_id,
                error_kind = %kind,
                "Job run interrupted: {}", message
            ),
        }
    }

    pub fn log_completion(&self, segments: usize, total_frames: u64) {
        info!(
            job_id = %self.job_id,
            worker_id = %self.worker_id,
            segments,
            total_frames,
            "Job completed"
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Span wrapping a whole run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            worker_id = %self.worker_id
        )
    }
}

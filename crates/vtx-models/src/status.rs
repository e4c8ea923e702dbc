//! Job status views for polling collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{FrameRange, Job, JobError, JobId, JobStage};

/// Status of one planned segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentStatus {
    pub index: u32,
    pub range: FrameRange,
    pub sealed: bool,
    /// Manifest reference, present once sealed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
}

/// Snapshot returned by `get_job_status`.
///
/// `manual_review` is reported as its own stage; whether to show it to end
/// users as an error is a presentation decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub stage: JobStage,
    pub total_frames: u64,
    /// Frames durably checkpointed
    pub frames_completed: u64,
    pub segments: Vec<SegmentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatusView {
    /// Build a view from the job record and its checkpoint.
    ///
    /// `artifact_ref` maps a sealed segment to its downloadable reference.
    pub fn from_job(
        job: &Job,
        last_completed_frame: Option<u64>,
        artifact_ref: impl Fn(&Job, u32) -> String,
    ) -> Self {
        let frames_completed = last_completed_frame
            .map(|f| (f + 1).min(job.total_frames))
            .unwrap_or(0);

        let segments = job
            .segments
            .iter()
            .map(|s| SegmentStatus {
                index: s.index,
                range: s.range,
                sealed: s.sealed,
                artifact_ref: s.sealed.then(|| artifact_ref(job, s.index)),
            })
            .collect();

        Self {
            job_id: job.id.clone(),
            stage: job.stage,
            total_frames: job.total_frames,
            frames_completed,
            segments,
            error: job.error.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }

    /// Progress percentage (0-100).
    pub fn progress_percent(&self) -> u8 {
        if self.total_frames == 0 {
            return 0;
        }
        ((self.frames_completed * 100) / self.total_frames).min(100) as u8
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

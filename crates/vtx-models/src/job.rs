//! Job definitions for the conversion pipeline.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::{ErrorKind, FrameRange, SegmentPlan};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to the source video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceRef {
    /// URI or path understood by the frame decoder
    pub uri: String,
    /// Duration declared by the submitter, in seconds
    pub declared_duration_secs: f64,
}

impl SourceRef {
    pub fn new(uri: impl Into<String>, declared_duration_secs: f64) -> Self {
        Self {
            uri: uri.into(),
            declared_duration_secs,
        }
    }
}

/// Processing stage of a job.
///
/// `queued → planning → processing → assembling → completed`, with `failed`
/// and `manual_review` reachable from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    #[default]
    Queued,
    Planning,
    Processing,
    Assembling,
    Completed,
    Failed,
    ManualReview,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Queued => "queued",
            JobStage::Planning => "planning",
            JobStage::Processing => "processing",
            JobStage::Assembling => "assembling",
            JobStage::Completed => "completed",
            JobStage::Failed => "failed",
            JobStage::ManualReview => "manual_review",
        }
    }

    /// Check if this is a terminal stage (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStage::Completed | JobStage::Failed | JobStage::ManualReview
        )
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: JobStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (JobStage::Queued, JobStage::Planning)
                | (JobStage::Planning, JobStage::Processing)
                | (JobStage::Processing, JobStage::Assembling)
                | (JobStage::Assembling, JobStage::Completed)
                | (_, JobStage::Failed)
                | (_, JobStage::ManualReview)
        )
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rejected stage change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid stage transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStage,
    pub to: JobStage,
}

/// Failure recorded on a job when it leaves the happy path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// One video-to-document conversion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Video to convert
    pub source: SourceRef,

    /// `ceil(declared_duration * sampling_fps)`
    pub total_frames: u64,

    /// Current stage
    #[serde(default)]
    pub stage: JobStage,

    /// Segment plan; empty until planning completes
    #[serde(default)]
    pub segments: Vec<SegmentPlan>,

    /// Failure that moved the job to a terminal exception stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a queued job.
    pub fn new(source: SourceRef, total_frames: u64) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            source,
            total_frames,
            stage: JobStage::Queued,
            segments: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Full frame range of the job.
    pub fn frame_range(&self) -> FrameRange {
        FrameRange::new(0, self.total_frames)
    }

    /// Move to `next`, bumping `updated_at`.
    pub fn transition(&mut self, next: JobStage) -> Result<(), InvalidTransition> {
        if !self.stage.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.stage,
                to: next,
            });
        }
        self.stage = next;
        self.touch();
        Ok(())
    }

    /// Record a failure and move to a terminal exception stage.
    pub fn fail(
        &mut self,
        stage: JobStage,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Result<(), InvalidTransition> {
        self.transition(stage)?;
        self.error = Some(JobError {
            kind,
            message: message.into(),
            at: Utc::now(),
        });
        Ok(())
    }

    /// Segment owning `frame`, if any.
    pub fn segment_for_frame(&self, frame: u64) -> Option<&SegmentPlan> {
        self.segments.iter().find(|s| s.range.contains(frame))
    }

    /// Whether every planned segment has been sealed.
    pub fn all_segments_sealed(&self) -> bool {
        !self.segments.is_empty() && self.segments.iter().all(|s| s.sealed)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

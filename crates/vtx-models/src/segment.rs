//! Segment plans: one planned output artifact per contiguous frame range.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{FrameRange, JobId};

/// Identifier of one segment's artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ArtifactId(pub String);

impl ArtifactId {
    /// Deterministic artifact id for a job's segment.
    pub fn for_segment(job_id: &JobId, index: u32) -> Self {
        Self(format!("{}-s{:03}", job_id, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One planned output artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SegmentPlan {
    /// Position in the plan
    pub index: u32,
    /// Frames written to this segment's artifact
    pub range: FrameRange,
    /// Artifact receiving the pages
    pub artifact_id: ArtifactId,
    /// Set once the artifact is sealed
    #[serde(default)]
    pub sealed: bool,
}

impl SegmentPlan {
    pub fn new(job_id: &JobId, index: u32, range: FrameRange) -> Self {
        Self {
            index,
            range,
            artifact_id: ArtifactId::for_segment(job_id, index),
            sealed: false,
        }
    }

    /// Same planned boundaries and artifact, ignoring seal progress.
    pub fn same_plan(&self, other: &SegmentPlan) -> bool {
        self.index == other.index
            && self.range == other.range
            && self.artifact_id == other.artifact_id
    }
}

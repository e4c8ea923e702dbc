//! Artifact manifests.
//!
//! An artifact is the paginated document for one segment: one page per
//! sampled frame, stored as individual page blobs and indexed by a manifest.
//! Pages are written in frame order, so the manifest only has to remember
//! how far the contiguous prefix reaches.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ArtifactId, FrameRange, JobId, SegmentPlan};

/// Content type of every page blob.
pub const PAGE_CONTENT_TYPE: &str = "image/jpeg";

/// Manifest update that would break append-only or seal semantics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error("artifact {artifact} is sealed")]
    Sealed { artifact: String },

    #[error("append {range} outside artifact range {bounds}")]
    OutOfRange { range: FrameRange, bounds: FrameRange },

    #[error("append {range} leaves a gap after frame {written_end}")]
    Gap { range: FrameRange, written_end: u64 },

    #[error("artifact {artifact} incomplete: {written_end} of {end} frames written")]
    Incomplete {
        artifact: String,
        written_end: u64,
        end: u64,
    },
}

/// Outcome of recording an append on a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Manifest advanced; pages are new.
    Advanced,
    /// Every page was already recorded (replayed batch).
    AlreadyWritten,
}

/// Index of one segment's artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactManifest {
    pub job_id: JobId,
    pub segment_index: u32,
    pub artifact_id: ArtifactId,
    /// Frames that belong in this artifact
    pub range: FrameRange,
    /// Pages `[range.start, written_end)` are durable
    pub written_end: u64,
    pub content_type: String,
    pub sealed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sealed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ArtifactManifest {
    /// Empty manifest for a planned segment.
    pub fn for_segment(job_id: &JobId, plan: &SegmentPlan) -> Self {
        Self {
            job_id: job_id.clone(),
            segment_index: plan.index,
            artifact_id: plan.artifact_id.clone(),
            range: plan.range,
            written_end: plan.range.start,
            content_type: PAGE_CONTENT_TYPE.to_string(),
            sealed: false,
            sealed_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Number of pages durably written.
    pub fn page_count(&self) -> u64 {
        self.written_end - self.range.start
    }

    /// Frames of the artifact that are durable.
    pub fn written_range(&self) -> FrameRange {
        FrameRange::new(self.range.start, self.written_end)
    }

    /// Every page of the segment has been written.
    pub fn is_complete(&self) -> bool {
        self.written_end == self.range.end
    }

    /// Record that pages for `range` were written.
    ///
    /// Replays of already recorded pages are accepted so a reprocessed batch
    /// does not duplicate pages.
    pub fn record_append(&mut self, range: FrameRange) -> Result<AppendOutcome, ManifestError> {
        if !self.range.covers(&range) {
            return Err(ManifestError::OutOfRange {
                range,
                bounds: self.range,
            });
        }
        if range.end <= self.written_end {
            return Ok(AppendOutcome::AlreadyWritten);
        }
        if self.sealed {
            return Err(ManifestError::Sealed {
                artifact: self.artifact_id.to_string(),
            });
        }
        if range.start > self.written_end {
            return Err(ManifestError::Gap {
                range,
                written_end: self.written_end,
            });
        }
        self.written_end = range.end;
        self.updated_at = Utc::now();
        Ok(AppendOutcome::Advanced)
    }

    /// Seal a complete artifact. Sealing twice is a no-op.
    pub fn seal(&mut self) -> Result<(), ManifestError> {
        if self.sealed {
            return Ok(());
        }
        if !self.is_complete() {
            return Err(ManifestError::Incomplete {
                artifact: self.artifact_id.to_string(),
                written_end: self.written_end,
                end: self.range.end,
            });
        }
        let now = Utc::now();
        self.sealed = true;
        self.sealed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}

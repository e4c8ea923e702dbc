//! Shared data models for the VTX visual transcript pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, stages and recorded failures
//! - Frame ranges and segment plans
//! - Checkpoint and lease records
//! - Artifact manifests
//! - Status views exposed to collaborators

pub mod artifact;
pub mod checkpoint;
pub mod error_kind;
pub mod frame;
pub mod job;
pub mod segment;
pub mod status;

// Re-export common types
pub use artifact::{AppendOutcome, ArtifactManifest, ManifestError, PAGE_CONTENT_TYPE};
pub use checkpoint::{Checkpoint, Lease};
pub use error_kind::ErrorKind;
pub use frame::{total_frames_for, FrameRange, SAMPLING_FPS};
pub use job::{InvalidTransition, Job, JobError, JobId, JobStage, SourceRef};
pub use segment::{ArtifactId, SegmentPlan};
pub use status::{JobStatusView, SegmentStatus};

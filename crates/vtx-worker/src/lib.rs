//! Batched, checkpointed video-to-document worker.
//!
//! This crate provides:
//! - Pipeline configuration and error classification
//! - Backoff with jitter and cancellation
//! - Segment planning, batch processing and document assembly
//! - The per-job orchestrator state machine and the queue-driven executor
//! - `JobService`, the submit/status surface used by the API

pub mod assembler;
pub mod batch;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod segmenter;
pub mod service;

pub use assembler::{AssembleOutcome, DocumentAssembler};
pub use batch::{BatchProcessor, BatchStats, FrameBatch};
pub use config::{
    BackoffConfig, ConfigError, LeaseConfig, PipelineConfig, SegmentThresholds, StorageBackend,
    WorkerConfig, MAX_DECLARED_DURATION_SECS,
};
pub use error::{PipelineError, PipelineResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use orchestrator::{Orchestrator, PipelineDeps, RunOutcome, RunReport, RunStats};
pub use retry::Backoff;
pub use segmenter::plan_segments;
pub use service::JobService;

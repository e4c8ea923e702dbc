//! Worker and pipeline configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use vtx_media::TransformConfig;
use vtx_models::SAMPLING_FPS;
use vtx_storage::{BlobStore, FsBlobStore, R2BlobStore, StorageResult};

/// Rejected configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Retry delays for externally fallible steps.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Base delay for retryable I/O failures
    pub base_delay: Duration,
    /// Base delay when the backend reports throttling
    pub quota_base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Attempts per operation, including the first
    pub max_attempts: u32,
    /// Jitter is drawn from `[0, jitter_ratio * base * 2^n]`
    pub jitter_ratio: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            quota_base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            max_attempts: 3,
            jitter_ratio: 0.3,
        }
    }
}

/// Default upper bound on a declared duration, 24 hours.
pub const MAX_DECLARED_DURATION_SECS: f64 = 24.0 * 60.0 * 60.0;

/// Duration thresholds for segment planning.
///
/// Below `single_segment_below_secs` a job gets one artifact. Up to and
/// including `chunked_above_secs` it gets between `min_equal_segments` and
/// `max_equal_segments` equal shares, the fewest that keep every segment
/// within `chunk_frames`. Longer jobs are cut into `chunk_frames` chunks,
/// up to `max_declared_duration_secs` and at most `max_segments` of them.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentThresholds {
    pub single_segment_below_secs: f64,
    pub chunked_above_secs: f64,
    pub chunk_frames: u64,
    pub min_equal_segments: u32,
    pub max_equal_segments: u32,
    /// Longest declared duration a job may be submitted with
    pub max_declared_duration_secs: f64,
    /// Most segments a single plan may hold
    pub max_segments: u64,
}

impl Default for SegmentThresholds {
    fn default() -> Self {
        Self {
            single_segment_below_secs: 30.0 * 60.0,
            chunked_above_secs: 2.0 * 60.0 * 60.0,
            chunk_frames: 5_400,
            min_equal_segments: 3,
            max_equal_segments: 4,
            max_declared_duration_secs: MAX_DECLARED_DURATION_SECS,
            max_segments: 64,
        }
    }
}

/// Job lease timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseConfig {
    /// Validity of a lease from its last renewal
    pub ttl: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(120),
        }
    }
}

/// Everything the pipeline needs to process one job.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Sampled frames per second of video
    pub sampling_fps: u32,
    /// Frames per batch; bounds peak memory
    pub max_batch_frames: u64,
    /// Raw frames decoded before a transform pass
    pub transform_chunk_frames: usize,
    pub segment_thresholds: SegmentThresholds,
    pub backoff: BackoffConfig,
    pub transform: TransformConfig,
    pub lease: LeaseConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sampling_fps: SAMPLING_FPS,
            max_batch_frames: 500,
            transform_chunk_frames: 16,
            segment_thresholds: SegmentThresholds::default(),
            backoff: BackoffConfig::default(),
            transform: TransformConfig::default(),
            lease: LeaseConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `VTX_*` environment variables.
    ///
    /// The sampling rate is not read from the environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sampling_fps: defaults.sampling_fps,
            max_batch_frames: env_parse("VTX_MAX_BATCH_FRAMES")
                .unwrap_or(defaults.max_batch_frames),
            transform_chunk_frames: env_parse("VTX_TRANSFORM_CHUNK_FRAMES")
                .unwrap_or(defaults.transform_chunk_frames),
            segment_thresholds: SegmentThresholds {
                max_declared_duration_secs: env_parse("VTX_MAX_DURATION_SECS")
                    .unwrap_or(defaults.segment_thresholds.max_declared_duration_secs),
                ..defaults.segment_thresholds
            },
            backoff: BackoffConfig {
                base_delay: env_parse("VTX_BACKOFF_BASE_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.backoff.base_delay),
                quota_base_delay: env_parse("VTX_BACKOFF_QUOTA_BASE_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.backoff.quota_base_delay),
                max_delay: env_parse("VTX_BACKOFF_CAP_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.backoff.max_delay),
                max_attempts: env_parse("VTX_BACKOFF_MAX_ATTEMPTS")
                    .unwrap_or(defaults.backoff.max_attempts),
                jitter_ratio: defaults.backoff.jitter_ratio,
            },
            transform: TransformConfig {
                max_height: env_parse("VTX_MAX_PAGE_HEIGHT")
                    .unwrap_or(defaults.transform.max_height),
                jpeg_quality: env_parse("VTX_JPEG_QUALITY")
                    .unwrap_or(defaults.transform.jpeg_quality),
            },
            lease: LeaseConfig {
                ttl: env_parse("VTX_LEASE_TTL_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.lease.ttl),
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.segment_thresholds;
        let b = &self.backoff;
        let checks: [(bool, &str); 12] = [
            (self.sampling_fps > 0, "sampling_fps must be positive"),
            (self.max_batch_frames > 0, "max_batch_frames must be positive"),
            (self.transform_chunk_frames > 0, "transform_chunk_frames must be positive"),
            (
                t.chunk_frames > 0 && t.chunk_frames % u64::from(self.sampling_fps.max(1)) == 0,
                "chunk_frames must be a positive multiple of sampling_fps",
            ),
            (
                t.single_segment_below_secs > 0.0
                    && t.single_segment_below_secs <= t.chunked_above_secs,
                "segment duration thresholds out of order",
            ),
            (
                t.min_equal_segments > 0 && t.min_equal_segments <= t.max_equal_segments,
                "equal segment counts out of order",
            ),
            (
                t.max_declared_duration_secs.is_finite()
                    && t.max_declared_duration_secs >= t.chunked_above_secs
                    && t.max_segments >= u64::from(t.max_equal_segments),
                "duration or segment limit below the equal-share bucket",
            ),
            (b.max_attempts > 0, "max_attempts must be at least 1"),
            (b.max_delay >= b.base_delay, "backoff cap below base delay"),
            ((0.0..=1.0).contains(&b.jitter_ratio), "jitter_ratio must be within [0, 1]"),
            (
                (1..=100).contains(&self.transform.jpeg_quality) && self.transform.max_height > 0,
                "transform settings out of range",
            ),
            (!self.lease.ttl.is_zero(), "lease ttl must be positive"),
        ];

        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, msg)) => Err(ConfigError(msg.to_string())),
            None => Ok(()),
        }
    }
}

/// Blob store backend selected at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    R2,
    Filesystem(PathBuf),
}

impl StorageBackend {
    /// `VTX_STORAGE_DIR` selects a local directory; R2 otherwise.
    pub fn from_env() -> Self {
        match std::env::var("VTX_STORAGE_DIR") {
            Ok(dir) if !dir.is_empty() => StorageBackend::Filesystem(PathBuf::from(dir)),
            _ => StorageBackend::R2,
        }
    }

    pub fn open(&self) -> StorageResult<Arc<dyn BlobStore>> {
        let store: Arc<dyn BlobStore> = match self {
            StorageBackend::R2 => Arc::new(R2BlobStore::from_env()?),
            StorageBackend::Filesystem(root) => Arc::new(FsBlobStore::new(root.clone())),
        };
        Ok(store)
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// How often the worker should scan for stalled deliveries
    pub claim_interval: Duration,
    /// Minimum idle time before a pending delivery can be claimed
    pub claim_min_idle: Duration,
    /// How long a queue read blocks
    pub consume_block: Duration,
    /// Lease holder and consumer name
    pub worker_id: String,
    pub storage: StorageBackend,
    /// Prometheus listener port, disabled when unset
    pub metrics_port: Option<u16>,
    pub pipeline: PipelineConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            shutdown_timeout: Duration::from_secs(30),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300), // 5 minutes
            consume_block: Duration::from_secs(1),
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
            storage: StorageBackend::R2,
            metrics_port: None,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_parse("WORKER_MAX_JOBS").unwrap_or(defaults.max_concurrent_jobs),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            claim_interval: env_parse("WORKER_CLAIM_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_interval),
            claim_min_idle: env_parse("WORKER_CLAIM_MIN_IDLE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_min_idle),
            consume_block: defaults.consume_block,
            worker_id: std::env::var("WORKER_ID").unwrap_or(defaults.worker_id),
            storage: StorageBackend::from_env(),
            metrics_port: env_parse("WORKER_METRICS_PORT"),
            pipeline: PipelineConfig::from_env(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError("max_concurrent_jobs must be positive".to_string()));
        }
        if self.worker_id.is_empty() {
            return Err(ConfigError("worker_id must not be empty".to_string()));
        }
        self.pipeline.validate()
    }
}

//! Application state.

use std::sync::Arc;

use vtx_queue::RedisJobQueue;
use vtx_storage::BlobStateStore;
use vtx_worker::{JobService, PipelineConfig, StorageBackend};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub jobs: JobService,
}

impl AppState {
    /// Create application state from the environment: blob storage per
    /// `VTX_STORAGE_DIR` (R2 when unset) and the Redis job queue.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let blobs = StorageBackend::from_env().open()?;
        let state = Arc::new(BlobStateStore::new(blobs.clone()));

        let queue = RedisJobQueue::from_env()?;
        queue.init().await?;

        let pipeline = PipelineConfig::from_env();
        let jobs = JobService::new(
            state.clone(),
            state,
            blobs,
            Arc::new(queue),
            pipeline.sampling_fps,
        )
        .with_max_duration(pipeline.segment_thresholds.max_declared_duration_secs);

        Ok(Self { config, jobs })
    }

    /// State over an already-built service.
    pub fn with_service(config: ApiConfig, jobs: JobService) -> Self {
        Self { config, jobs }
    }
}

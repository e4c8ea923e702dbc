//! Job submission and status.

use std::sync::Arc;

use tracing::info;
use vtx_models::{total_frames_for, Job, JobId, JobStatusView, SourceRef};
use vtx_queue::{ConvertVideoJob, JobQueuePort};
use vtx_storage::{ArtifactStore, BlobStore, CheckpointStore, JobRepository};

use crate::config::MAX_DECLARED_DURATION_SECS;
use crate::error::{PipelineError, PipelineResult};

/// Entry point for collaborators that submit jobs and poll their status.
#[derive(Clone)]
pub struct JobService {
    jobs: Arc<dyn JobRepository>,
    checkpoints: Arc<dyn CheckpointStore>,
    artifacts: ArtifactStore<Arc<dyn BlobStore>>,
    queue: Arc<dyn JobQueuePort>,
    sampling_fps: u32,
    max_duration_secs: f64,
}

impl JobService {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        checkpoints: Arc<dyn CheckpointStore>,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<dyn JobQueuePort>,
        sampling_fps: u32,
    ) -> Self {
        Self {
            jobs,
            checkpoints,
            artifacts: ArtifactStore::new(blobs),
            queue,
            sampling_fps,
            max_duration_secs: MAX_DECLARED_DURATION_SECS,
        }
    }

    /// Override the longest declared duration accepted at submission.
    pub fn with_max_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Create a queued job and hand it to the workers.
    ///
    /// Rejects empty sources, and durations that are not positive, finite and
    /// within the configured limit.
    pub async fn submit_job(
        &self,
        source_uri: &str,
        declared_duration_secs: f64,
    ) -> PipelineResult<JobId> {
        if source_uri.trim().is_empty() {
            return Err(PipelineError::source_unreadable("source uri is empty"));
        }
        let total_frames = total_frames_for(declared_duration_secs, self.sampling_fps)
            .ok_or_else(|| {
                PipelineError::source_unreadable(format!(
                    "invalid declared duration: {}",
                    declared_duration_secs
                ))
            })?;
        if declared_duration_secs > self.max_duration_secs {
            return Err(PipelineError::source_unreadable(format!(
                "declared duration {}s exceeds the {}s limit",
                declared_duration_secs, self.max_duration_secs
            )));
        }

        let job = Job::new(SourceRef::new(source_uri, declared_duration_secs), total_frames);
        self.jobs.create_job(&job).await?;
        self.queue.enqueue(ConvertVideoJob::new(job.id.clone())).await?;

        info!(
            job_id = %job.id,
            total_frames,
            duration_secs = declared_duration_secs,
            "Job submitted"
        );
        Ok(job.id)
    }

    /// Current status, or `None` for an unknown job.
    pub async fn get_job_status(&self, job_id: &JobId) -> PipelineResult<Option<JobStatusView>> {
        let Some(job) = self.jobs.get_job(job_id).await? else {
            return Ok(None);
        };
        let checkpoint = self.checkpoints.get_checkpoint(job_id).await?;
        Ok(Some(JobStatusView::from_job(
            &job,
            checkpoint.map(|cp| cp.last_completed_frame),
            |job, index| match job.segments.iter().find(|s| s.index == index) {
                Some(plan) => ArtifactStore::<Arc<dyn BlobStore>>::manifest_ref(&job.id, &plan.artifact_id),
                None => String::new(),
            },
        )))
    }

    /// Artifact references of every sealed segment, in segment order.
    pub async fn list_artifacts(&self, job_id: &JobId) -> PipelineResult<Option<Vec<String>>> {
        let Some(job) = self.jobs.get_job(job_id).await? else {
            return Ok(None);
        };

        let mut refs = Vec::new();
        for plan in job.segments.iter().filter(|s| s.sealed) {
            if let Some(manifest) = self.artifacts.load_manifest(&job.id, &plan.artifact_id).await? {
                if manifest.sealed {
                    refs.push(ArtifactStore::<Arc<dyn BlobStore>>::manifest_ref(
                        &job.id,
                        &plan.artifact_id,
                    ));
                }
            }
        }
        Ok(Some(refs))
    }

    /// Probe the job repository with a point read.
    pub async fn check_storage(&self) -> PipelineResult<()> {
        self.jobs.get_job(&JobId::from_string("_health")).await?;
        Ok(())
    }

    /// Current queue depth.
    pub async fn check_queue(&self) -> PipelineResult<u64> {
        Ok(self.queue.len().await?)
    }

    /// Check the backing stores answer.
    pub async fn check_ready(&self) -> PipelineResult<()> {
        self.check_storage().await?;
        self.check_queue().await?;
        Ok(())
    }
}

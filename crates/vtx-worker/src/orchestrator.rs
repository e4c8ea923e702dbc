//! Job orchestration.
//!
//! A run takes the job lease, plans segments, then walks the frame range
//! batch by batch from the checkpoint: extract, transform, append, advance
//! the checkpoint, renew the lease. Once the last frame is checkpointed the
//! segment artifacts are verified and the job completes.
//!
//! Failures that survive retries are recorded on the job and routed to
//! `failed` or `manual_review`. Cancellation and lease loss end the run
//! without touching the job so the next lease holder resumes it.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{warn, Instrument};
use vtx_media::FrameSource;
use vtx_models::{ErrorKind, FrameRange, Job, JobId, JobStage, Lease};
use vtx_storage::{BlobStore, CheckpointStore, JobRepository, LeaseOutcome};

use crate::assembler::DocumentAssembler;
use crate::batch::BatchProcessor;
use crate::config::PipelineConfig;
use crate::error::{terminal_stage_for, PipelineError, PipelineResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::Backoff;
use crate::segmenter::plan_segments;

/// Collaborators a run needs.
#[derive(Clone)]
pub struct PipelineDeps {
    pub jobs: Arc<dyn JobRepository>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    /// Artifact pages and manifests
    pub blobs: Arc<dyn BlobStore>,
    pub frames: Arc<dyn FrameSource>,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Routed to `failed`
    Failed(ErrorKind),
    /// Routed to `manual_review`
    ManualReview(ErrorKind),
    /// Nothing to do; the job had already finished
    AlreadyTerminal(JobStage),
    /// Another worker holds the lease
    LeaseHeld { holder: String },
    /// The lease expired or was taken over mid-run
    LeaseLost,
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Failed(_) => "failed",
            RunOutcome::ManualReview(_) => "manual_review",
            RunOutcome::AlreadyTerminal(_) => "already_terminal",
            RunOutcome::LeaseHeld { .. } => "lease_held",
            RunOutcome::LeaseLost => "lease_lost",
            RunOutcome::Cancelled => "cancelled",
        }
    }

    /// Whether the job reached a terminal stage and its delivery can be
    /// acknowledged.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            RunOutcome::Completed
                | RunOutcome::Failed(_)
                | RunOutcome::ManualReview(_)
                | RunOutcome::AlreadyTerminal(_)
        )
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// First frame processed by this run
    pub resumed_from: u64,
    pub batches: u64,
    pub frames: u64,
    /// Pages found already written from an earlier run
    pub skipped_pages: u64,
    pub peak_batch_frames: u64,
    pub peak_batch_bytes: u64,
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub stats: RunStats,
}

/// Drives jobs through the pipeline.
#[derive(Clone)]
pub struct Orchestrator {
    deps: PipelineDeps,
    config: PipelineConfig,
    worker_id: String,
    processor: BatchProcessor,
    assembler: DocumentAssembler,
}

impl Orchestrator {
    pub fn new(deps: PipelineDeps, config: PipelineConfig, worker_id: impl Into<String>) -> Self {
        let processor = BatchProcessor::new(
            deps.frames.clone(),
            config.transform,
            config.sampling_fps,
            config.transform_chunk_frames,
        );
        let assembler = DocumentAssembler::new(deps.blobs.clone());
        Self {
            deps,
            config,
            worker_id: worker_id.into(),
            processor,
            assembler,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run a job until it reaches a terminal stage or the run is interrupted.
    ///
    /// Returns `Err` only when the failure could not be recorded on the job,
    /// for example when the job does not exist.
    pub async fn run(&self, job_id: &JobId, cancel: &CancellationToken) -> PipelineResult<RunReport> {
        let logger = JobLogger::new(job_id, &self.worker_id);
        let span = logger.create_span();
        self.run_inner(job_id, cancel, &logger).instrument(span).await
    }

    async fn run_inner(
        &self,
        job_id: &JobId,
        cancel: &CancellationToken,
        logger: &JobLogger,
    ) -> PipelineResult<RunReport> {
        let backoff = Backoff::new(self.config.backoff.clone());
        let mut stats = RunStats::default();

        let job = backoff
            .retry("load_job", cancel, |_| async move {
                self.deps.jobs.get_job(job_id).await.map_err(PipelineError::from)
            })
            .await?;
        let Some(mut job) = job else {
            return Err(PipelineError::invariant(format!("job {} not found", job_id)));
        };

        if job.stage.is_terminal() {
            return Ok(self.finish(RunOutcome::AlreadyTerminal(job.stage), stats, &backoff));
        }

        let ttl = self.config.lease.ttl;
        let acquired = backoff
            .retry("acquire_lease", cancel, |_| async move {
                self.deps
                    .checkpoints
                    .acquire_lease(job_id, &self.worker_id, ttl)
                    .await
                    .map_err(PipelineError::from)
            })
            .await?;
        let mut lease = match acquired {
            LeaseOutcome::Acquired(lease) => lease,
            LeaseOutcome::Held(other) => {
                logger.log_warning(&format!("lease held by {}", other.holder));
                return Ok(self.finish(
                    RunOutcome::LeaseHeld {
                        holder: other.holder,
                    },
                    stats,
                    &backoff,
                ));
            }
        };

        let result = self
            .drive(&mut job, &mut lease, &backoff, &mut stats, cancel, logger)
            .await;

        let outcome = match result {
            Ok(()) => {
                logger.log_completion(job.segments.len(), job.total_frames);
                self.release(&lease).await;
                RunOutcome::Completed
            }
            Err(e) if e.kind == ErrorKind::Cancelled => {
                logger.log_failure(e.kind, None, &e.message);
                self.release(&lease).await;
                RunOutcome::Cancelled
            }
            Err(e) if e.kind == ErrorKind::LeaseLost => {
                logger.log_failure(e.kind, None, &e.message);
                RunOutcome::LeaseLost
            }
            Err(e) => self.route_failure(&mut job, &lease, e, logger).await?,
        };

        Ok(self.finish(outcome, stats, &backoff))
    }

    fn finish(&self, outcome: RunOutcome, mut stats: RunStats, backoff: &Backoff) -> RunReport {
        stats.retries = backoff.retries();
        metrics::record_job_outcome(outcome.as_str());
        RunReport { outcome, stats }
    }

    /// Record a failure on the job and move it to its terminal stage.
    async fn route_failure(
        &self,
        job: &mut Job,
        lease: &Lease,
        error: PipelineError,
        logger: &JobLogger,
    ) -> PipelineResult<RunOutcome> {
        let Some(stage) = terminal_stage_for(error.kind) else {
            return Ok(RunOutcome::Cancelled);
        };
        logger.log_failure(error.kind, Some(stage), &error.message);

        if lease.is_expired() {
            return Ok(RunOutcome::LeaseLost);
        }

        let from = job.stage;
        job.fail(stage, error.kind, error.message.clone())?;
        logger.log_stage(from, stage);

        // The run's token may already be cancelled; recording the failure
        // must still go through.
        let backoff = Backoff::new(self.config.backoff.clone());
        let uncancelled = CancellationToken::new();
        let failed: &Job = job;
        let saved = backoff
            .retry("save_job", &uncancelled, |_| async move {
                self.deps
                    .jobs
                    .save_job(failed, lease)
                    .await
                    .map_err(PipelineError::from)
            })
            .await;
        match saved {
            Ok(()) => {}
            Err(e) if e.kind == ErrorKind::LeaseLost => {
                warn!(job_id = %job.id, "Lease lost before recording the failure: {}", e);
                return Ok(RunOutcome::LeaseLost);
            }
            Err(e) => return Err(e),
        }
        self.release(lease).await;

        Ok(match stage {
            JobStage::Failed => RunOutcome::Failed(error.kind),
            _ => RunOutcome::ManualReview(error.kind),
        })
    }

    async fn release(&self, lease: &Lease) {
        if let Err(e) = self.deps.checkpoints.release_lease(lease).await {
            warn!(job_id = %lease.job_id, "Failed to release lease: {}", e);
        }
    }

    async fn drive(
        &self,
        job: &mut Job,
        lease: &mut Lease,
        backoff: &Backoff,
        stats: &mut RunStats,
        cancel: &CancellationToken,
        logger: &JobLogger,
    ) -> PipelineResult<()> {
        if job.stage == JobStage::Queued {
            self.advance(job, JobStage::Planning, lease, backoff, cancel, logger)
                .await?;
        }

        if job.stage == JobStage::Planning {
            self.plan(job)?;
            self.advance(job, JobStage::Processing, lease, backoff, cancel, logger)
                .await?;
        }

        if job.stage == JobStage::Processing {
            self.verify_plan(job)?;
            self.process(job, lease, backoff, stats, cancel, logger)
                .await?;
            self.advance(job, JobStage::Assembling, lease, backoff, cancel, logger)
                .await?;
        }

        if job.stage == JobStage::Assembling {
            self.assemble(job, backoff, cancel).await?;
            self.advance(job, JobStage::Completed, lease, backoff, cancel, logger)
                .await?;
        }

        Ok(())
    }

    /// Compute the plan, or check a persisted one against a fresh plan.
    fn plan(&self, job: &mut Job) -> PipelineResult<()> {
        let planned = self.fresh_plan(job)?;
        if job.segments.is_empty() {
            job.segments = planned;
            Ok(())
        } else {
            self.verify_plan(job)
        }
    }

    fn fresh_plan(&self, job: &Job) -> PipelineResult<Vec<vtx_models::SegmentPlan>> {
        let (total_frames, planned) = plan_segments(
            &job.id,
            job.source.declared_duration_secs,
            self.config.sampling_fps,
            &self.config.segment_thresholds,
        )?;
        if total_frames != job.total_frames {
            return Err(PipelineError::invariant(format!(
                "planned {} frames but job records {}",
                total_frames, job.total_frames
            )));
        }
        Ok(planned)
    }

    fn verify_plan(&self, job: &Job) -> PipelineResult<()> {
        let planned = self.fresh_plan(job)?;
        let matches = planned.len() == job.segments.len()
            && planned
                .iter()
                .zip(&job.segments)
                .all(|(fresh, stored)| fresh.same_plan(stored));
        if !matches {
            return Err(PipelineError::invariant(format!(
                "persisted plan of {} segments does not match a fresh plan of {}",
                job.segments.len(),
                planned.len()
            )));
        }
        Ok(())
    }

    async fn process(
        &self,
        job: &mut Job,
        lease: &mut Lease,
        backoff: &Backoff,
        stats: &mut RunStats,
        cancel: &CancellationToken,
        logger: &JobLogger,
    ) -> PipelineResult<()> {
        let job_id = &job.id;
        let checkpoint = backoff
            .retry("load_checkpoint", cancel, |_| async move {
                self.deps
                    .checkpoints
                    .get_checkpoint(job_id)
                    .await
                    .map_err(PipelineError::from)
            })
            .await?;
        let start = checkpoint.map(|cp| cp.resume_frame()).unwrap_or(0);
        if start > job.total_frames {
            return Err(PipelineError::invariant(format!(
                "checkpoint resumes at frame {} beyond {} planned frames",
                start, job.total_frames
            )));
        }

        stats.resumed_from = start;
        logger.log_start(start, job.total_frames);

        let remaining = FrameRange::new(start, job.total_frames);
        for window in remaining.windows(self.config.max_batch_frames) {
            if cancel.is_cancelled() {
                return Err(PipelineError::cancelled());
            }
            if lease.is_expired() {
                return Err(PipelineError::lease_lost(format!(
                    "lease on {} expired before batch {}",
                    job.id, window
                )));
            }

            let started = Instant::now();
            let current: &Job = job;
            let held: &Lease = lease;

            // A failed attempt discards the batch; the retry extracts it again.
            let (batch_stats, appended) = backoff
                .retry("process_batch", cancel, |_| async move {
                    let batch = self.processor.process(current, window, cancel).await?;
                    let appended = self.assembler.append(current, &batch).await?;
                    Ok::<_, PipelineError>((batch.stats, appended))
                })
                .await?;

            let last_completed = window.end - 1;
            backoff
                .retry("advance_checkpoint", cancel, |_| async move {
                    self.deps
                        .checkpoints
                        .advance_checkpoint(held, last_completed)
                        .await
                        .map_err(PipelineError::from)
                })
                .await?;

            stats.batches += 1;
            stats.frames += batch_stats.frames;
            stats.skipped_pages += appended.skipped_pages;
            stats.peak_batch_frames = stats.peak_batch_frames.max(batch_stats.peak_frames_held);
            stats.peak_batch_bytes = stats.peak_batch_bytes.max(batch_stats.peak_bytes_held);
            metrics::record_batch(
                batch_stats.frames,
                appended.skipped_pages,
                started.elapsed().as_secs_f64(),
                batch_stats.peak_bytes_held,
            );
            logger.log_batch(window, appended.appended_pages, last_completed);

            if !appended.sealed.is_empty() {
                for index in &appended.sealed {
                    if let Some(plan) = job.segments.iter_mut().find(|s| s.index == *index) {
                        plan.sealed = true;
                    }
                    metrics::record_artifact_sealed();
                }
                job.touch();
                self.save(job, lease, backoff, cancel).await?;
            }

            let ttl = self.config.lease.ttl;
            let held: &Lease = lease;
            *lease = backoff
                .retry("renew_lease", cancel, |_| async move {
                    self.deps
                        .checkpoints
                        .renew_lease(held, ttl)
                        .await
                        .map_err(PipelineError::from)
                })
                .await?;
        }

        Ok(())
    }

    /// Verify every segment artifact is sealed and complete.
    async fn assemble(
        &self,
        job: &mut Job,
        backoff: &Backoff,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        let job_id = &job.id;
        let checkpoint = backoff
            .retry("load_checkpoint", cancel, |_| async move {
                self.deps
                    .checkpoints
                    .get_checkpoint(job_id)
                    .await
                    .map_err(PipelineError::from)
            })
            .await?;
        let resume = checkpoint.map(|cp| cp.resume_frame()).unwrap_or(0);
        if resume != job.total_frames {
            return Err(PipelineError::invariant(format!(
                "assembling with checkpoint at frame {} of {}",
                resume, job.total_frames
            )));
        }

        let current: &Job = job;
        let mut sealed = Vec::with_capacity(current.segments.len());
        for plan in &current.segments {
            backoff
                .retry("seal_artifact", cancel, |_| {
                    self.assembler.seal_complete(current, plan)
                })
                .await?;
            sealed.push(plan.index);
        }

        for plan in job.segments.iter_mut() {
            plan.sealed = sealed.contains(&plan.index);
        }
        if !job.all_segments_sealed() {
            return Err(PipelineError::invariant("not every segment could be sealed"));
        }
        Ok(())
    }

    async fn advance(
        &self,
        job: &mut Job,
        next: JobStage,
        lease: &Lease,
        backoff: &Backoff,
        cancel: &CancellationToken,
        logger: &JobLogger,
    ) -> PipelineResult<()> {
        let from = job.stage;
        job.transition(next)?;
        self.save(job, lease, backoff, cancel).await?;
        logger.log_stage(from, next);
        Ok(())
    }

    /// Persist the job while the lease is still held.
    async fn save(
        &self,
        job: &Job,
        lease: &Lease,
        backoff: &Backoff,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        if lease.is_expired() {
            return Err(PipelineError::lease_lost(format!(
                "lease on {} expired before saving the job",
                job.id
            )));
        }
        backoff
            .retry("save_job", cancel, |_| async move {
                self.deps
                    .jobs
                    .save_job(job, lease)
                    .await
                    .map_err(PipelineError::from)
            })
            .await
    }
}

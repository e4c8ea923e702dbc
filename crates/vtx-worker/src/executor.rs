//! Job executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use vtx_queue::{Delivery, JobQueuePort};

use crate::config::WorkerConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::metrics;
use crate::orchestrator::{Orchestrator, RunOutcome};

/// Pulls deliveries from the queue and runs them through the orchestrator,
/// at most `max_concurrent_jobs` at a time.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<dyn JobQueuePort>,
    orchestrator: Arc<Orchestrator>,
    job_semaphore: Arc<Semaphore>,
    /// Stops consuming new deliveries
    shutdown: CancellationToken,
    /// Interrupts runs in flight
    jobs_cancel: CancellationToken,
}

impl JobExecutor {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn JobQueuePort>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        Self {
            config,
            queue,
            orchestrator,
            job_semaphore,
            shutdown: CancellationToken::new(),
            jobs_cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the executor when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run until shutdown is signalled.
    pub async fn run(&self) -> PipelineResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.config.worker_id, self.config.max_concurrent_jobs
        );

        let claim_task = self.spawn_claim_task();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping executor");
                    break;
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        tokio::select! {
                            _ = self.shutdown.cancelled() => {}
                            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                        }
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            // Interrupted runs release their leases and stay resumable.
            warn!("In-flight jobs still running, cancelling them");
            self.jobs_cancel.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(10), self.wait_for_jobs()).await;
        }

        info!("Job executor stopped");
        Ok(())
    }

    fn spawn_claim_task(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let orchestrator = Arc::clone(&self.orchestrator);
        let semaphore = Arc::clone(&self.job_semaphore);
        let shutdown = self.shutdown.clone();
        let jobs_cancel = self.jobs_cancel.clone();
        let consumer = self.config.worker_id.clone();
        let claim_interval = self.config.claim_interval;
        let min_idle_ms = self.config.claim_min_idle.as_millis() as u64;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(claim_interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let free = semaphore.available_permits();
                        if free == 0 {
                            continue;
                        }
                        match queue.claim_pending(&consumer, min_idle_ms, free.min(5)).await {
                            Ok(deliveries) if !deliveries.is_empty() => {
                                info!("Claimed {} pending jobs", deliveries.len());
                                for delivery in deliveries {
                                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                                        break;
                                    };
                                    let queue = Arc::clone(&queue);
                                    let orchestrator = Arc::clone(&orchestrator);
                                    let cancel = jobs_cancel.clone();
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute_job(orchestrator, queue, delivery, cancel).await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Failed to claim pending jobs: {}", e),
                        }
                    }
                }
            }
        })
    }

    /// Consume and dispatch deliveries up to the free job slots.
    async fn consume_jobs(&self) -> PipelineResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let deliveries = self
            .queue
            .consume(
                &self.config.worker_id,
                self.config.consume_block.as_millis() as u64,
                available.min(5),
            )
            .await?;

        if deliveries.is_empty() {
            return Ok(());
        }
        debug!("Consumed {} jobs from queue", deliveries.len());

        for delivery in deliveries {
            let permit = self
                .job_semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::invariant("job semaphore closed"))?;
            let queue = Arc::clone(&self.queue);
            let orchestrator = Arc::clone(&self.orchestrator);
            let cancel = self.jobs_cancel.clone();
            metrics::set_jobs_in_flight(
                self.config.max_concurrent_jobs - self.job_semaphore.available_permits(),
            );

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(orchestrator, queue, delivery, cancel).await;
            });
        }

        Ok(())
    }

    /// Run one delivery and settle it with the queue.
    ///
    /// Settled runs are acked. Interrupted runs and lease contention leave
    /// the delivery pending so it is claimed again later.
    async fn execute_job(
        orchestrator: Arc<Orchestrator>,
        queue: Arc<dyn JobQueuePort>,
        delivery: Delivery,
        cancel: CancellationToken,
    ) {
        let job_id = delivery.job.job_id.clone();
        info!("Executing job {}", job_id);

        match orchestrator.run(&job_id, &cancel).await {
            Ok(report) if report.outcome.is_settled() => {
                info!(
                    job_id = %job_id,
                    outcome = report.outcome.as_str(),
                    batches = report.stats.batches,
                    frames = report.stats.frames,
                    retries = report.stats.retries,
                    "Job run settled"
                );
                if let Err(e) = queue.ack(&delivery.message_id).await {
                    error!("Failed to ack job {}: {}", job_id, e);
                }
            }
            Ok(report) => {
                match &report.outcome {
                    RunOutcome::LeaseHeld { holder } => {
                        info!("Job {} is being run by {}, leaving it pending", job_id, holder)
                    }
                    other => info!(
                        "Job {} run ended ({}), leaving it pending",
                        job_id,
                        other.as_str()
                    ),
                }
            }
            Err(e) if e.is_retryable() => {
                warn!("Job {} could not start, will be redelivered: {}", job_id, e);
            }
            Err(e) => {
                error!("Job {} cannot run, moving to DLQ: {}", job_id, e);
                if let Err(dlq_err) = queue.dead_letter(&delivery, &e.to_string()).await {
                    error!("Failed to move job {} to DLQ: {}", job_id, dlq_err);
                }
            }
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        loop {
            let available = self.job_semaphore.available_permits();
            if available == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::PipelineDeps;
    use crate::PipelineConfig;
    use vtx_media::SyntheticFrameSource;
    use vtx_models::{Job, JobStage, SourceRef};
    use vtx_queue::{ConvertVideoJob, MemoryJobQueue};
    use vtx_storage::{BlobStateStore, JobRepository, MemoryBlobStore};

    #[tokio::test]
    async fn test_executor_drains_queue_and_acks() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let state = Arc::new(BlobStateStore::new(blobs.clone()));
        let queue = Arc::new(MemoryJobQueue::new());

        let mut pipeline = PipelineConfig::default();
        pipeline.max_batch_frames = 40;
        let orchestrator = Arc::new(Orchestrator::new(
            PipelineDeps {
                jobs: state.clone(),
                checkpoints: state.clone(),
                blobs,
                frames: Arc::new(SyntheticFrameSource::new(4, 4)),
            },
            pipeline,
            "worker-test",
        ));

        let job = Job::new(SourceRef::new("synthetic://exec", 30.0), 90);
        state.create_job(&job).await.unwrap();
        queue.enqueue(ConvertVideoJob::new(job.id.clone())).await.unwrap();

        let config = WorkerConfig {
            worker_id: "worker-test".to_string(),
            consume_block: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(5),
            ..WorkerConfig::default()
        };
        let executor = Arc::new(JobExecutor::new(config, queue.clone(), orchestrator));
        let handle = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.run().await })
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let stored = state.get_job(&job.id).await.unwrap().unwrap();
            if stored.stage == JobStage::Completed && queue.len().await.unwrap() == 0 {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "job did not complete");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        executor.shutdown();
        handle.await.unwrap().unwrap();
    }
}

//! End-to-end pipeline runs against in-memory stores and a synthetic source.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use vtx_media::SyntheticFrameSource;
use vtx_models::{Checkpoint, ErrorKind, Job, JobId, JobStage, Lease};
use vtx_queue::MemoryJobQueue;
use vtx_storage::{
    keys, Blob, BlobStateStore, BlobStore, CheckpointStore, JobRepository, LeaseOutcome,
    MemoryBlobStore, Precondition, StorageError, StorageResult,
};
use vtx_worker::{JobService, Orchestrator, PipelineConfig, PipelineDeps, RunOutcome, RunReport};

type State = BlobStateStore<Arc<dyn BlobStore>>;

fn fast_config(max_batch_frames: u64) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.max_batch_frames = max_batch_frames;
    config.backoff.base_delay = Duration::from_millis(1);
    config.backoff.quota_base_delay = Duration::from_millis(2);
    config.backoff.max_delay = Duration::from_millis(10);
    config
}

fn page_frame(key: &str) -> Option<u64> {
    let (_, name) = key.rsplit_once("/pages/")?;
    name.strip_suffix(".jpg")?.parse().ok()
}

/// Blob store wrapper that fails selected page writes and records the
/// frames of successful ones.
struct ScriptedBlobStore {
    inner: Arc<MemoryBlobStore>,
    /// Page frame whose first write fails once
    fail_once_at: Option<u64>,
    failed: AtomicBool,
    /// Every page write fails
    fail_all_pages: bool,
    written: Mutex<Vec<u64>>,
}

impl ScriptedBlobStore {
    fn new(inner: Arc<MemoryBlobStore>) -> Self {
        Self {
            inner,
            fail_once_at: None,
            failed: AtomicBool::new(false),
            fail_all_pages: false,
            written: Mutex::new(Vec::new()),
        }
    }

    fn written(&self) -> Vec<u64> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobStore for ScriptedBlobStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Blob>> {
        self.inner.get(key).await
    }

    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
        precondition: Precondition,
    ) -> StorageResult<String> {
        if let Some(frame) = page_frame(key) {
            if self.fail_all_pages {
                return Err(StorageError::upload_failed("connection reset by peer"));
            }
            if self.fail_once_at == Some(frame) && !self.failed.swap(true, Ordering::SeqCst) {
                return Err(StorageError::upload_failed("503 Service Unavailable"));
            }
            self.written.lock().unwrap().push(frame);
        }
        self.inner.put(key, data, content_type, precondition).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }
}

/// Checkpoint store wrapper that records advances and can stall forever at
/// one frame, standing in for a worker that dies before committing.
struct RecordingCheckpoints {
    inner: Arc<State>,
    stall_at: Option<u64>,
    stalled: Arc<Notify>,
    advanced: Mutex<Vec<u64>>,
}

impl RecordingCheckpoints {
    fn new(inner: Arc<State>) -> Self {
        Self {
            inner,
            stall_at: None,
            stalled: Arc::new(Notify::new()),
            advanced: Mutex::new(Vec::new()),
        }
    }

    fn advanced(&self) -> Vec<u64> {
        self.advanced.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckpointStore for RecordingCheckpoints {
    async fn get_checkpoint(&self, job_id: &JobId) -> StorageResult<Option<Checkpoint>> {
        self.inner.get_checkpoint(job_id).await
    }

    async fn advance_checkpoint(
        &self,
        lease: &Lease,
        last_completed_frame: u64,
    ) -> StorageResult<Checkpoint> {
        if self.stall_at == Some(last_completed_frame) {
            self.stalled.notify_one();
            std::future::pending::<()>().await;
        }
        let checkpoint = self.inner.advance_checkpoint(lease, last_completed_frame).await?;
        self.advanced.lock().unwrap().push(last_completed_frame);
        Ok(checkpoint)
    }

    async fn acquire_lease(
        &self,
        job_id: &JobId,
        holder: &str,
        ttl: Duration,
    ) -> StorageResult<LeaseOutcome> {
        self.inner.acquire_lease(job_id, holder, ttl).await
    }

    async fn renew_lease(&self, lease: &Lease, ttl: Duration) -> StorageResult<Lease> {
        self.inner.renew_lease(lease, ttl).await
    }

    async fn release_lease(&self, lease: &Lease) -> StorageResult<()> {
        self.inner.release_lease(lease).await
    }

    async fn current_lease(&self, job_id: &JobId) -> StorageResult<Option<Lease>> {
        self.inner.current_lease(job_id).await
    }
}

struct Harness {
    memory: Arc<MemoryBlobStore>,
    state: Arc<State>,
    service: JobService,
}

impl Harness {
    fn new() -> Self {
        let memory = Arc::new(MemoryBlobStore::new());
        let blobs: Arc<dyn BlobStore> = memory.clone();
        let state = Arc::new(BlobStateStore::new(blobs.clone()));
        let service = JobService::new(
            state.clone(),
            state.clone(),
            blobs,
            Arc::new(MemoryJobQueue::new()),
            3,
        );
        Self {
            memory,
            state,
            service,
        }
    }

    fn orchestrator(&self, config: PipelineConfig, worker: &str) -> Orchestrator {
        self.orchestrator_with(
            config,
            worker,
            self.memory.clone(),
            self.state.clone(),
        )
    }

    fn orchestrator_with(
        &self,
        config: PipelineConfig,
        worker: &str,
        blobs: Arc<dyn BlobStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Orchestrator {
        Orchestrator::new(
            PipelineDeps {
                jobs: self.state.clone(),
                checkpoints,
                blobs,
                frames: Arc::new(SyntheticFrameSource::new(4, 4)),
            },
            config,
            worker,
        )
    }

    async fn submit(&self, seconds: f64) -> JobId {
        self.service
            .submit_job("synthetic://video.mp4", seconds)
            .await
            .unwrap()
    }

    async fn job(&self, job_id: &JobId) -> Job {
        self.state.get_job(job_id).await.unwrap().unwrap()
    }

    async fn page_count(&self, job: &Job) -> usize {
        let mut total = 0;
        for plan in &job.segments {
            total += self
                .memory
                .list(&format!("{}pages/", keys::artifact_prefix(&job.id, &plan.artifact_id)))
                .await
                .unwrap()
                .len();
        }
        total
    }
}

async fn run(orchestrator: &Orchestrator, job_id: &JobId) -> RunReport {
    orchestrator
        .run(job_id, &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_ten_minute_video_is_one_artifact() {
    let harness = Harness::new();
    let job_id = harness.submit(600.0).await;

    let report = run(&harness.orchestrator(fast_config(500), "worker-a"), &job_id).await;
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.stats.batches, 4);
    assert_eq!(report.stats.frames, 1800);

    let job = harness.job(&job_id).await;
    assert_eq!(job.stage, JobStage::Completed);
    assert_eq!(job.segments.len(), 1);
    assert!(job.all_segments_sealed());
    assert_eq!(harness.page_count(&job).await, 1800);

    let status = harness.service.get_job_status(&job_id).await.unwrap().unwrap();
    assert_eq!(status.frames_completed, 1800);
    assert_eq!(status.progress_percent(), 100);
    assert!(status.segments[0].artifact_ref.is_some());
    assert_eq!(
        harness.service.list_artifacts(&job_id).await.unwrap().unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_three_hour_video_is_six_chunks() {
    let harness = Harness::new();
    let job_id = harness.submit(3.0 * 3600.0).await;

    let report = run(&harness.orchestrator(fast_config(500), "worker-a"), &job_id).await;
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.stats.batches, 65);

    let job = harness.job(&job_id).await;
    assert_eq!(job.total_frames, 32_400);
    assert_eq!(job.segments.len(), 6);
    assert!(job.segments.iter().all(|s| s.range.len() == 5_400 && s.sealed));
    assert_eq!(harness.page_count(&job).await, 32_400);

    let checkpoint = harness.state.get_checkpoint(&job_id).await.unwrap().unwrap();
    assert_eq!(checkpoint.last_completed_frame, 32_399);
}

#[tokio::test]
async fn test_transient_error_on_third_batch_is_retried() {
    let harness = Harness::new();
    // 4998 frames: ten batches of at most 500.
    let job_id = harness.submit(1666.0).await;

    let mut flaky = ScriptedBlobStore::new(harness.memory.clone());
    flaky.fail_once_at = Some(1_000);
    let flaky = Arc::new(flaky);
    let checkpoints = Arc::new(RecordingCheckpoints::new(harness.state.clone()));

    let orchestrator = harness.orchestrator_with(
        fast_config(500),
        "worker-a",
        flaky.clone(),
        checkpoints.clone(),
    );
    let report = run(&orchestrator, &job_id).await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.stats.batches, 10);
    assert_eq!(report.stats.retries, 1);

    // Every batch commits exactly once, in order.
    let expected: Vec<u64> = (1..=10).map(|b| (b * 500).min(4_998) - 1).collect();
    assert_eq!(checkpoints.advanced(), expected);

    // Only the retried batch may rewrite pages; every frame lands.
    let written = flaky.written();
    let unique: BTreeSet<u64> = written.iter().copied().collect();
    assert_eq!(unique.len(), 4_998);
    assert!(written.len() - 4_998 < 500);
    let outside_retry = written
        .iter()
        .filter(|frame| **frame < 1_000 || **frame >= 1_500)
        .count();
    assert_eq!(outside_retry, 4_498);
    let job = harness.job(&job_id).await;
    assert_eq!(job.stage, JobStage::Completed);
    assert_eq!(harness.page_count(&job).await, 4_998);
}

#[tokio::test]
async fn test_crash_before_fifth_checkpoint_resumes_without_duplicates() {
    let harness = Harness::new();
    // 6000 frames in three segments.
    let job_id = harness.submit(2000.0).await;

    let mut stalling = RecordingCheckpoints::new(harness.state.clone());
    stalling.stall_at = Some(2_499);
    let stalled = stalling.stalled.clone();
    let stalling = Arc::new(stalling);

    let mut first_config = fast_config(500);
    first_config.lease.ttl = Duration::from_secs(1);
    let first = harness.orchestrator_with(
        first_config,
        "worker-a",
        harness.memory.clone(),
        stalling.clone(),
    );

    let crashed = {
        let job_id = job_id.clone();
        tokio::spawn(async move { first.run(&job_id, &CancellationToken::new()).await })
    };
    tokio::time::timeout(Duration::from_secs(30), stalled.notified())
        .await
        .expect("worker never reached the fifth checkpoint");
    crashed.abort();
    assert!(crashed.await.unwrap_err().is_cancelled());
    assert_eq!(stalling.advanced(), vec![499, 999, 1_499, 1_999]);

    // Before the lease expires nobody else may take the job.
    let blocked = run(&harness.orchestrator(fast_config(500), "worker-b"), &job_id).await;
    assert_eq!(
        blocked.outcome,
        RunOutcome::LeaseHeld {
            holder: "worker-a".to_string()
        }
    );

    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let recorder = Arc::new(ScriptedBlobStore::new(harness.memory.clone()));
    let second = harness.orchestrator_with(
        fast_config(500),
        "worker-b",
        recorder.clone(),
        harness.state.clone(),
    );
    let report = run(&second, &job_id).await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.stats.resumed_from, 2_000);
    assert_eq!(report.stats.batches, 8);
    // The interrupted batch was appended but not checkpointed: replayed, not duplicated.
    assert_eq!(report.stats.skipped_pages, 500);
    assert!(recorder.written().iter().all(|frame| *frame >= 2_500));

    let job = harness.job(&job_id).await;
    assert_eq!(job.stage, JobStage::Completed);
    assert_eq!(job.segments.len(), 3);
    assert!(job.all_segments_sealed());
    assert_eq!(harness.page_count(&job).await, 6_000);
}

#[tokio::test]
async fn test_second_worker_cannot_run_leased_job() {
    let harness = Harness::new();
    let job_id = harness.submit(60.0).await;

    match harness
        .state
        .acquire_lease(&job_id, "worker-a", Duration::from_secs(60))
        .await
        .unwrap()
    {
        LeaseOutcome::Acquired(_) => {}
        LeaseOutcome::Held(_) => panic!("fresh job already leased"),
    }

    let report = run(&harness.orchestrator(fast_config(500), "worker-b"), &job_id).await;
    assert_eq!(
        report.outcome,
        RunOutcome::LeaseHeld {
            holder: "worker-a".to_string()
        }
    );
    assert_eq!(harness.job(&job_id).await.stage, JobStage::Queued);
}

#[tokio::test]
async fn test_peak_batch_memory_does_not_grow_with_video_length() {
    let harness = Harness::new();
    let short = harness.submit(400.0).await;
    let long = harness.submit(800.0).await;
    let orchestrator = harness.orchestrator(fast_config(100), "worker-a");

    let short_report = run(&orchestrator, &short).await;
    let long_report = run(&orchestrator, &long).await;

    assert_eq!(short_report.stats.frames, 1_200);
    assert_eq!(long_report.stats.frames, 2_400);
    assert!(short_report.stats.peak_batch_frames <= 100);
    assert_eq!(
        short_report.stats.peak_batch_frames,
        long_report.stats.peak_batch_frames
    );
    assert!(long_report.stats.peak_batch_bytes < short_report.stats.peak_batch_bytes * 3 / 2);
}

#[tokio::test]
async fn test_exhausted_transient_errors_fail_the_job() {
    let harness = Harness::new();
    let job_id = harness.submit(30.0).await;

    let mut broken = ScriptedBlobStore::new(harness.memory.clone());
    broken.fail_all_pages = true;
    let orchestrator = harness.orchestrator_with(
        fast_config(500),
        "worker-a",
        Arc::new(broken),
        harness.state.clone(),
    );

    let report = run(&orchestrator, &job_id).await;
    assert_eq!(report.outcome, RunOutcome::Failed(ErrorKind::TransientIo));
    assert_eq!(report.stats.retries, 2);

    let job = harness.job(&job_id).await;
    assert_eq!(job.stage, JobStage::Failed);
    assert_eq!(job.error.unwrap().kind, ErrorKind::TransientIo);
    assert!(harness.state.get_checkpoint(&job_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancel_during_backoff_leaves_job_resumable() {
    let harness = Harness::new();
    let job_id = harness.submit(30.0).await;

    let mut broken = ScriptedBlobStore::new(harness.memory.clone());
    broken.fail_all_pages = true;
    let mut config = fast_config(500);
    config.backoff.base_delay = Duration::from_secs(60);
    config.backoff.max_delay = Duration::from_secs(60);
    let orchestrator = Arc::new(harness.orchestrator_with(
        config,
        "worker-a",
        Arc::new(broken),
        harness.state.clone(),
    ));

    let cancel = CancellationToken::new();
    let task = {
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        let job_id = job_id.clone();
        tokio::spawn(async move { orchestrator.run(&job_id, &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let report = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("run did not stop promptly")
        .unwrap()
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::Cancelled);

    let job = harness.job(&job_id).await;
    assert_eq!(job.stage, JobStage::Processing);
    assert!(job.error.is_none());
    let lease = harness.state.current_lease(&job_id).await.unwrap().unwrap();
    assert!(lease.is_expired());
}

#[tokio::test]
async fn test_unreadable_source_routes_to_manual_review() {
    let harness = Harness::new();
    let job_id = harness.submit(100.0).await;

    let orchestrator = Orchestrator::new(
        PipelineDeps {
            jobs: harness.state.clone(),
            checkpoints: harness.state.clone(),
            blobs: harness.memory.clone(),
            frames: Arc::new(SyntheticFrameSource::new(4, 4).with_available_frames(150)),
        },
        fast_config(100),
        "worker-a",
    );
    let report = run(&orchestrator, &job_id).await;
    assert_eq!(report.outcome, RunOutcome::ManualReview(ErrorKind::SourceUnreadable));
    // Unreadable sources are not retried.
    assert_eq!(report.stats.retries, 0);

    let status = harness.service.get_job_status(&job_id).await.unwrap().unwrap();
    assert_eq!(status.stage, JobStage::ManualReview);
    assert_eq!(status.frames_completed, 100);
    assert_eq!(status.error.unwrap().kind, ErrorKind::SourceUnreadable);
}

//! Job, checkpoint and lease records on top of a blob store.
//!
//! Every record is a JSON object. Leases and checkpoints are updated with
//! read-modify-write cycles guarded by the etag of the version read, so two
//! workers racing for the same record cannot both win.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};
use vtx_models::{Checkpoint, Job, JobId, Lease};

use crate::blob::{BlobStore, Precondition};
use crate::error::{StorageError, StorageResult};
use crate::keys;

const JSON: &str = "application/json";

/// Result of a lease acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// The caller now holds the lease.
    Acquired(Lease),
    /// Another holder has an unexpired lease.
    Held(Lease),
}

/// Persistence for job records.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Store a new job; fails if the id is taken.
    async fn create_job(&self, job: &Job) -> StorageResult<()>;

    /// Overwrite a job record on behalf of the holder of `lease`.
    ///
    /// Fails with `LeaseLost` if the lease expired or changed hands, or if
    /// the record was rewritten between the lease check and the write.
    async fn save_job(&self, job: &Job, lease: &Lease) -> StorageResult<()>;

    async fn get_job(&self, job_id: &JobId) -> StorageResult<Option<Job>>;
}

/// Durable progress and exclusive ownership for jobs.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get_checkpoint(&self, job_id: &JobId) -> StorageResult<Option<Checkpoint>>;

    /// Move the checkpoint forward to `last_completed_frame`.
    ///
    /// The write is fenced by `lease`: it fails with `LeaseLost` if the
    /// caller no longer holds an unexpired lease. Writing the current value
    /// again is a no-op; moving backwards fails with `CheckpointRegression`.
    async fn advance_checkpoint(
        &self,
        lease: &Lease,
        last_completed_frame: u64,
    ) -> StorageResult<Checkpoint>;

    async fn acquire_lease(
        &self,
        job_id: &JobId,
        holder: &str,
        ttl: Duration,
    ) -> StorageResult<LeaseOutcome>;

    /// Extend a held lease; `LeaseLost` if it expired or changed hands.
    async fn renew_lease(&self, lease: &Lease, ttl: Duration) -> StorageResult<Lease>;

    /// Give up a held lease so another worker can take over immediately.
    async fn release_lease(&self, lease: &Lease) -> StorageResult<()>;

    async fn current_lease(&self, job_id: &JobId) -> StorageResult<Option<Lease>>;
}

/// Job and checkpoint repository backed by any `BlobStore`.
#[derive(Debug, Clone)]
pub struct BlobStateStore<B> {
    blobs: B,
}

impl<B: BlobStore> BlobStateStore<B> {
    pub fn new(blobs: B) -> Self {
        Self { blobs }
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<(T, String)>> {
        let Some(blob) = self.blobs.get(key).await? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&blob.data)
            .map_err(|e| StorageError::corrupt(key, e.to_string()))?;
        Ok(Some((value, blob.etag)))
    }

    async fn store<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        precondition: Precondition,
    ) -> StorageResult<String> {
        let data = serde_json::to_vec(value)?;
        self.blobs.put(key, data, JSON, precondition).await
    }

    /// Current lease only if `lease` is still its unexpired holder.
    async fn fenced(&self, lease: &Lease) -> StorageResult<(Lease, String)> {
        let lost = || StorageError::LeaseLost(lease.job_id.to_string());
        let (current, etag) = self
            .load::<Lease>(&keys::lease(&lease.job_id))
            .await?
            .ok_or_else(lost)?;
        if !current.same_claim(lease) || current.is_expired() {
            return Err(lost());
        }
        Ok((current, etag))
    }
}

fn chrono_ttl(ttl: Duration) -> StorageResult<chrono::Duration> {
    chrono::Duration::from_std(ttl)
        .map_err(|e| StorageError::Rejected(format!("lease ttl out of range: {}", e)))
}

#[async_trait]
impl<B: BlobStore> JobRepository for BlobStateStore<B> {
    async fn create_job(&self, job: &Job) -> StorageResult<()> {
        keys::validate_id(job.id.as_str())?;
        self.store(&keys::job(&job.id), job, Precondition::Absent)
            .await?;
        Ok(())
    }

    async fn save_job(&self, job: &Job, lease: &Lease) -> StorageResult<()> {
        if lease.job_id != job.id {
            return Err(StorageError::LeaseLost(job.id.to_string()));
        }
        let key = keys::job(&job.id);
        let precondition = match self.blobs.get(&key).await? {
            Some(blob) => Precondition::Matches(blob.etag),
            None => Precondition::Absent,
        };
        self.fenced(lease).await?;

        match self.store(&key, job, precondition).await {
            Ok(_) => Ok(()),
            Err(StorageError::PreconditionFailed(_)) => {
                Err(StorageError::LeaseLost(job.id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn get_job(&self, job_id: &JobId) -> StorageResult<Option<Job>> {
        keys::validate_id(job_id.as_str())?;
        Ok(self.load(&keys::job(job_id)).await?.map(|(job, _)| job))
    }
}

#[async_trait]
impl<B: BlobStore> CheckpointStore for BlobStateStore<B> {
    async fn get_checkpoint(&self, job_id: &JobId) -> StorageResult<Option<Checkpoint>> {
        Ok(self
            .load(&keys::checkpoint(job_id))
            .await?
            .map(|(cp, _)| cp))
    }

    async fn advance_checkpoint(
        &self,
        lease: &Lease,
        last_completed_frame: u64,
    ) -> StorageResult<Checkpoint> {
        self.fenced(lease).await?;

        let key = keys::checkpoint(&lease.job_id);
        let existing = self.load::<Checkpoint>(&key).await?;
        let precondition = match existing {
            Some((current, _)) if current.last_completed_frame == last_completed_frame => {
                return Ok(current);
            }
            Some((current, _)) if current.last_completed_frame > last_completed_frame => {
                return Err(StorageError::CheckpointRegression {
                    job_id: lease.job_id.to_string(),
                    current: current.last_completed_frame,
                    attempted: last_completed_frame,
                });
            }
            Some((_, etag)) => Precondition::Matches(etag),
            None => Precondition::Absent,
        };

        let checkpoint = Checkpoint::new(lease.job_id.clone(), last_completed_frame);
        match self.store(&key, &checkpoint, precondition).await {
            Ok(_) => {
                debug!(
                    job_id = %lease.job_id,
                    last_completed_frame,
                    "Checkpoint advanced"
                );
                Ok(checkpoint)
            }
            // Someone else wrote the checkpoint under our feet: only a
            // different lease holder can do that.
            Err(StorageError::PreconditionFailed(_)) => {
                Err(StorageError::LeaseLost(lease.job_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn acquire_lease(
        &self,
        job_id: &JobId,
        holder: &str,
        ttl: Duration,
    ) -> StorageResult<LeaseOutcome> {
        let key = keys::lease(job_id);
        let precondition = match self.load::<Lease>(&key).await? {
            Some((current, _)) if !current.is_expired() => {
                return Ok(LeaseOutcome::Held(current));
            }
            Some((stale, etag)) => {
                info!(
                    job_id = %job_id,
                    previous_holder = %stale.holder,
                    "Taking over expired lease"
                );
                Precondition::Matches(etag)
            }
            None => Precondition::Absent,
        };

        let lease = Lease::new(job_id.clone(), holder, chrono_ttl(ttl)?);
        match self.store(&key, &lease, precondition).await {
            Ok(_) => Ok(LeaseOutcome::Acquired(lease)),
            Err(StorageError::PreconditionFailed(_)) => {
                // Lost the race; report whoever won.
                match self.load::<Lease>(&key).await? {
                    Some((winner, _)) => Ok(LeaseOutcome::Held(winner)),
                    None => Err(StorageError::PreconditionFailed(key)),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn renew_lease(&self, lease: &Lease, ttl: Duration) -> StorageResult<Lease> {
        let (current, etag) = self.fenced(lease).await?;
        let renewed = current.renewed(chrono_ttl(ttl)?);
        match self
            .store(&keys::lease(&lease.job_id), &renewed, Precondition::Matches(etag))
            .await
        {
            Ok(_) => Ok(renewed),
            Err(StorageError::PreconditionFailed(_)) => {
                Err(StorageError::LeaseLost(lease.job_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn release_lease(&self, lease: &Lease) -> StorageResult<()> {
        let key = keys::lease(&lease.job_id);
        let Some((current, etag)) = self.load::<Lease>(&key).await? else {
            return Ok(());
        };
        if !current.same_claim(lease) {
            warn!(job_id = %lease.job_id, "Lease already held by {}", current.holder);
            return Ok(());
        }

        // Expire in place rather than delete so the write stays conditional.
        let released = Lease {
            expires_at: Utc::now(),
            ..current
        };
        match self.store(&key, &released, Precondition::Matches(etag)).await {
            Ok(_) | Err(StorageError::PreconditionFailed(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn current_lease(&self, job_id: &JobId) -> StorageResult<Option<Lease>> {
        Ok(self.load(&keys::lease(job_id)).await?.map(|(l, _)| l))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBlobStore;
    use std::sync::Arc;
    use vtx_models::SourceRef;

    const TTL: Duration = Duration::from_secs(30);

    fn store() -> BlobStateStore<Arc<MemoryBlobStore>> {
        BlobStateStore::new(Arc::new(MemoryBlobStore::new()))
    }

    async fn acquire(store: &BlobStateStore<Arc<MemoryBlobStore>>, job: &JobId, holder: &str) -> Lease {
        match store.acquire_lease(job, holder, TTL).await.unwrap() {
            LeaseOutcome::Acquired(lease) => lease,
            LeaseOutcome::Held(other) => panic!("lease held by {}", other.holder),
        }
    }

    #[tokio::test]
    async fn test_job_create_is_exclusive() {
        let store = store();
        let job = Job::new(SourceRef::new("a.mp4", 10.0), 30);
        store.create_job(&job).await.unwrap();
        assert!(store.create_job(&job).await.is_err());
        assert_eq!(store.get_job(&job.id).await.unwrap().unwrap(), job);
    }

    #[tokio::test]
    async fn test_job_save_is_fenced_by_lease() {
        let store = store();
        let mut job = Job::new(SourceRef::new("a.mp4", 10.0), 30);
        store.create_job(&job).await.unwrap();

        let stale = match store
            .acquire_lease(&job.id, "worker-a", Duration::ZERO)
            .await
            .unwrap()
        {
            LeaseOutcome::Acquired(lease) => lease,
            LeaseOutcome::Held(_) => unreachable!(),
        };
        let fresh = acquire(&store, &job.id, "worker-b").await;

        job.transition(vtx_models::JobStage::Planning).unwrap();
        store.save_job(&job, &fresh).await.unwrap();
        assert_eq!(store.get_job(&job.id).await.unwrap().unwrap(), job);

        let mut overwrite = job.clone();
        overwrite.transition(vtx_models::JobStage::Processing).unwrap();
        assert!(matches!(
            store.save_job(&overwrite, &stale).await,
            Err(StorageError::LeaseLost(_))
        ));
        assert_eq!(store.get_job(&job.id).await.unwrap().unwrap(), job);

        let other = Job::new(SourceRef::new("b.mp4", 10.0), 30);
        assert!(matches!(
            store.save_job(&other, &fresh).await,
            Err(StorageError::LeaseLost(_))
        ));
    }

    #[tokio::test]
    async fn test_second_worker_sees_lease_held() {
        let store = store();
        let job_id = JobId::from_string("job");
        let lease = acquire(&store, &job_id, "worker-a").await;

        match store.acquire_lease(&job_id, "worker-b", TTL).await.unwrap() {
            LeaseOutcome::Held(current) => assert!(current.same_claim(&lease)),
            LeaseOutcome::Acquired(_) => panic!("two holders"),
        }
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken_over() {
        let store = store();
        let job_id = JobId::from_string("job");
        let stale = match store
            .acquire_lease(&job_id, "worker-a", Duration::ZERO)
            .await
            .unwrap()
        {
            LeaseOutcome::Acquired(lease) => lease,
            LeaseOutcome::Held(_) => unreachable!(),
        };

        let fresh = acquire(&store, &job_id, "worker-b").await;
        assert_eq!(fresh.holder, "worker-b");

        // The previous holder is fenced out.
        assert!(matches!(
            store.advance_checkpoint(&stale, 10).await,
            Err(StorageError::LeaseLost(_))
        ));
        assert!(matches!(
            store.renew_lease(&stale, TTL).await,
            Err(StorageError::LeaseLost(_))
        ));
    }

    #[tokio::test]
    async fn test_checkpoint_is_monotonic() {
        let store = store();
        let job_id = JobId::from_string("job");
        let lease = acquire(&store, &job_id, "worker-a").await;

        store.advance_checkpoint(&lease, 499).await.unwrap();
        store.advance_checkpoint(&lease, 999).await.unwrap();
        // Re-writing the same value is accepted.
        store.advance_checkpoint(&lease, 999).await.unwrap();
        assert!(matches!(
            store.advance_checkpoint(&lease, 499).await,
            Err(StorageError::CheckpointRegression { current: 999, attempted: 499, .. })
        ));
        let cp = store.get_checkpoint(&job_id).await.unwrap().unwrap();
        assert_eq!(cp.resume_frame(), 1000);
    }

    #[tokio::test]
    async fn test_release_lets_next_worker_in() {
        let store = store();
        let job_id = JobId::from_string("job");
        let lease = acquire(&store, &job_id, "worker-a").await;
        let renewed = store.renew_lease(&lease, TTL).await.unwrap();
        assert!(renewed.expires_at >= lease.expires_at);

        store.release_lease(&renewed).await.unwrap();
        let next = acquire(&store, &job_id, "worker-b").await;
        assert_eq!(next.holder, "worker-b");
    }
}

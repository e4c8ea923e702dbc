//! Artifact page and manifest I/O.

use tracing::debug;
use vtx_models::{ArtifactId, ArtifactManifest, JobId, SegmentPlan, PAGE_CONTENT_TYPE};

use crate::blob::{BlobStore, Precondition};
use crate::error::{StorageError, StorageResult};
use crate::keys;

/// Reads and writes segment artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore<B> {
    blobs: B,
}

impl<B: BlobStore> ArtifactStore<B> {
    pub fn new(blobs: B) -> Self {
        Self { blobs }
    }

    /// Write the encoded page for `frame`, replacing any previous write.
    pub async fn put_page(
        &self,
        job_id: &JobId,
        artifact_id: &ArtifactId,
        frame: u64,
        data: Vec<u8>,
    ) -> StorageResult<()> {
        let key = keys::page(job_id, artifact_id, frame);
        self.blobs
            .put(&key, data, PAGE_CONTENT_TYPE, Precondition::None)
            .await?;
        Ok(())
    }

    pub async fn get_page(
        &self,
        job_id: &JobId,
        artifact_id: &ArtifactId,
        frame: u64,
    ) -> StorageResult<Option<Vec<u8>>> {
        let key = keys::page(job_id, artifact_id, frame);
        Ok(self.blobs.get(&key).await?.map(|b| b.data))
    }

    /// Page keys of an artifact in frame order.
    pub async fn list_pages(
        &self,
        job_id: &JobId,
        artifact_id: &ArtifactId,
    ) -> StorageResult<Vec<String>> {
        let prefix = format!("{}pages/", keys::artifact_prefix(job_id, artifact_id));
        self.blobs.list(&prefix).await
    }

    pub async fn load_manifest(
        &self,
        job_id: &JobId,
        artifact_id: &ArtifactId,
    ) -> StorageResult<Option<ArtifactManifest>> {
        Ok(self
            .load_versioned(job_id, artifact_id)
            .await?
            .map(|(manifest, _)| manifest))
    }

    async fn load_versioned(
        &self,
        job_id: &JobId,
        artifact_id: &ArtifactId,
    ) -> StorageResult<Option<(ArtifactManifest, String)>> {
        let key = keys::manifest(job_id, artifact_id);
        let Some(blob) = self.blobs.get(&key).await? else {
            return Ok(None);
        };
        let manifest = serde_json::from_slice(&blob.data)
            .map_err(|e| StorageError::corrupt(&key, e.to_string()))?;
        Ok(Some((manifest, blob.etag)))
    }

    /// Existing manifest for a planned segment with its etag, or an empty
    /// one with no etag.
    pub async fn open_manifest(
        &self,
        job_id: &JobId,
        plan: &SegmentPlan,
    ) -> StorageResult<(ArtifactManifest, Option<String>)> {
        match self.load_versioned(job_id, &plan.artifact_id).await? {
            Some((manifest, etag)) if manifest.range == plan.range => Ok((manifest, Some(etag))),
            Some((manifest, _)) => Err(StorageError::corrupt(
                keys::manifest(job_id, &plan.artifact_id),
                format!(
                    "manifest range {} does not match planned range {}",
                    manifest.range, plan.range
                ),
            )),
            None => Ok((ArtifactManifest::for_segment(job_id, plan), None)),
        }
    }

    /// Replace the manifest version carrying `etag`, or create it when
    /// `etag` is `None`. Returns the new etag.
    ///
    /// A manifest rewritten since it was opened means another worker owns
    /// the job now, so a failed precondition surfaces as `LeaseLost`.
    pub async fn save_manifest(
        &self,
        manifest: &ArtifactManifest,
        etag: Option<&str>,
    ) -> StorageResult<String> {
        let key = keys::manifest(&manifest.job_id, &manifest.artifact_id);
        let data = serde_json::to_vec_pretty(manifest)?;
        let precondition = match etag {
            Some(etag) => Precondition::Matches(etag.to_string()),
            None => Precondition::Absent,
        };
        let etag = match self.blobs.put(&key, data, "application/json", precondition).await {
            Ok(etag) => etag,
            Err(StorageError::PreconditionFailed(_)) => {
                return Err(StorageError::LeaseLost(manifest.job_id.to_string()))
            }
            Err(e) => return Err(e),
        };
        debug!(
            artifact_id = %manifest.artifact_id,
            written_end = manifest.written_end,
            sealed = manifest.sealed,
            "Saved manifest"
        );
        Ok(etag)
    }

    /// Reference handed to collaborators for a sealed artifact.
    pub fn manifest_ref(job_id: &JobId, artifact_id: &ArtifactId) -> String {
        keys::manifest(job_id, artifact_id)
    }
}

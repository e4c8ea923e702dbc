//! Document assembly.
//!
//! Pages of a batch are written to the artifact of the segment that owns
//! them, then the segment manifest is advanced. A batch is split where it
//! crosses a segment boundary. Replaying a batch whose pages are already
//! recorded is a no-op. A manifest only replaces the version it was read
//! from, so a worker that lost its lease cannot roll progress back.

use std::sync::Arc;

use futures::{stream, TryStreamExt};
use tracing::{debug, info};
use vtx_models::{AppendOutcome, ArtifactManifest, Job, SegmentPlan};
use vtx_storage::{ArtifactStore, BlobStore};

use crate::batch::FrameBatch;
use crate::error::{PipelineError, PipelineResult};

/// Concurrent page uploads per segment part.
const PAGE_UPLOAD_CONCURRENCY: usize = 8;

/// What one append did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembleOutcome {
    pub appended_pages: u64,
    /// Pages already recorded by an earlier run
    pub skipped_pages: u64,
    /// Segments sealed by this append
    pub sealed: Vec<u32>,
}

/// Writes batches into segment artifacts.
#[derive(Clone)]
pub struct DocumentAssembler {
    artifacts: ArtifactStore<Arc<dyn BlobStore>>,
}

impl DocumentAssembler {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            artifacts: ArtifactStore::new(blobs),
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore<Arc<dyn BlobStore>> {
        &self.artifacts
    }

    /// Append every page of `batch` to its segment's artifact.
    pub async fn append(&self, job: &Job, batch: &FrameBatch) -> PipelineResult<AssembleOutcome> {
        if batch.frames.len() as u64 != batch.range.len() {
            return Err(PipelineError::invariant(format!(
                "batch {} carries {} pages",
                batch.range,
                batch.frames.len()
            )));
        }

        let mut outcome = AssembleOutcome::default();
        let mut covered = 0u64;

        for plan in &job.segments {
            let Some(part) = plan.range.intersect(&batch.range) else {
                continue;
            };
            covered += part.len();

            let (mut manifest, mut etag) = self.artifacts.open_manifest(&job.id, plan).await?;
            let mut updated = manifest.clone();
            match updated.record_append(part)? {
                AppendOutcome::AlreadyWritten => {
                    debug!(
                        job_id = %job.id,
                        segment = plan.index,
                        part = %part,
                        "Pages already recorded, skipping"
                    );
                    outcome.skipped_pages += part.len();
                }
                AppendOutcome::Advanced => {
                    let offset = (part.start - batch.range.start) as usize;
                    let pages = &batch.frames[offset..offset + part.len() as usize];
                    self.write_pages(job, plan, pages).await?;
                    etag = Some(
                        self.artifacts
                            .save_manifest(&updated, etag.as_deref())
                            .await?,
                    );
                    outcome.appended_pages += part.len();
                    manifest = updated;
                }
            }

            if manifest.is_complete() && !manifest.sealed {
                self.seal(&mut manifest, etag.as_deref()).await?;
                outcome.sealed.push(plan.index);
            }
        }

        if covered != batch.range.len() {
            return Err(PipelineError::invariant(format!(
                "batch {} is not covered by the segment plan",
                batch.range
            )));
        }
        Ok(outcome)
    }

    /// Seal a segment whose pages are all written and check that every page
    /// exists. Returns the sealed manifest.
    pub async fn seal_complete(
        &self,
        job: &Job,
        plan: &SegmentPlan,
    ) -> PipelineResult<ArtifactManifest> {
        let (mut manifest, etag) = self.artifacts.open_manifest(&job.id, plan).await?;
        if !manifest.sealed {
            self.seal(&mut manifest, etag.as_deref()).await?;
        }

        let pages = self.artifacts.list_pages(&job.id, &plan.artifact_id).await?;
        if pages.len() as u64 != plan.range.len() {
            return Err(PipelineError::invariant(format!(
                "artifact {} has {} pages, expected {}",
                plan.artifact_id,
                pages.len(),
                plan.range.len()
            )));
        }
        Ok(manifest)
    }

    async fn seal(&self, manifest: &mut ArtifactManifest, etag: Option<&str>) -> PipelineResult<()> {
        manifest.seal()?;
        self.artifacts.save_manifest(manifest, etag).await?;
        info!(
            job_id = %manifest.job_id,
            segment = manifest.segment_index,
            pages = manifest.page_count(),
            "Artifact sealed"
        );
        Ok(())
    }

    async fn write_pages(
        &self,
        job: &Job,
        plan: &SegmentPlan,
        pages: &[vtx_media::EncodedFrame],
    ) -> PipelineResult<()> {
        stream::iter(pages.iter().map(Ok::<_, PipelineError>))
            .try_for_each_concurrent(PAGE_UPLOAD_CONCURRENCY, |page| async move {
                self.artifacts
                    .put_page(&job.id, &plan.artifact_id, page.index, page.jpeg.clone())
                    .await?;
                Ok::<(), PipelineError>(())
            })
            .await
    }
}

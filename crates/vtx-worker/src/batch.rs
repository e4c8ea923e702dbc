//! Batch extraction and transformation.
//!
//! A batch is decoded lazily and transformed in small chunks, so at most one
//! batch of encoded pages plus one chunk of raw frames is alive at a time.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use vtx_media::{transform_batch, EncodedFrame, FrameRequest, FrameSource, RawFrame, TransformConfig};
use vtx_models::{FrameRange, Job};

use crate::error::{PipelineError, PipelineResult};

/// Memory and size figures for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub frames: u64,
    pub raw_bytes: u64,
    pub encoded_bytes: u64,
    /// Most frames (raw and encoded) held at once
    pub peak_frames_held: u64,
    /// Most frame bytes (raw and encoded) held at once
    pub peak_bytes_held: u64,
    pub elapsed_ms: u64,
}

impl BatchStats {
    fn observe(&mut self, frames_held: u64, bytes_held: u64) {
        self.peak_frames_held = self.peak_frames_held.max(frames_held);
        self.peak_bytes_held = self.peak_bytes_held.max(bytes_held);
    }
}

/// Transformed pages for a contiguous frame range. Never persisted.
#[derive(Debug, Clone)]
pub struct FrameBatch {
    pub range: FrameRange,
    /// Pages in frame order, one per frame of `range`
    pub frames: Vec<EncodedFrame>,
    pub stats: BatchStats,
}

/// Pulls frames from a source and turns them into pages.
#[derive(Clone)]
pub struct BatchProcessor {
    source: Arc<dyn FrameSource>,
    transform: TransformConfig,
    fps: u32,
    chunk_frames: usize,
}

impl BatchProcessor {
    pub fn new(
        source: Arc<dyn FrameSource>,
        transform: TransformConfig,
        fps: u32,
        chunk_frames: usize,
    ) -> Self {
        Self {
            source,
            transform,
            fps,
            chunk_frames: chunk_frames.max(1),
        }
    }

    /// Extract and transform every frame of `range`.
    ///
    /// Fails as a whole: a batch either has a page for every frame or is
    /// discarded.
    pub async fn process(
        &self,
        job: &Job,
        range: FrameRange,
        cancel: &CancellationToken,
    ) -> PipelineResult<FrameBatch> {
        let started = Instant::now();
        let request = FrameRequest {
            uri: job.source.uri.clone(),
            range,
            total_frames: job.total_frames,
            fps: self.fps,
        };

        let mut stream = self.source.open(&request).await?;
        let mut stats = BatchStats::default();
        let mut pages: Vec<EncodedFrame> = Vec::with_capacity(range.len() as usize);
        let mut encoded_bytes = 0u64;
        let mut chunk: Vec<RawFrame> = Vec::with_capacity(self.chunk_frames);
        let mut chunk_bytes = 0u64;
        let mut expected = range.start;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::cancelled()),
                next = stream.next() => next,
            };

            let Some(frame) = next else { break };
            let frame = frame?;
            if frame.index != expected {
                return Err(PipelineError::invariant(format!(
                    "frame source yielded frame {} where {} was expected",
                    frame.index, expected
                )));
            }
            expected += 1;

            stats.raw_bytes += frame.byte_len() as u64;
            chunk_bytes += frame.byte_len() as u64;
            chunk.push(frame);
            stats.observe(
                pages.len() as u64 + chunk.len() as u64,
                encoded_bytes + chunk_bytes,
            );

            if chunk.len() >= self.chunk_frames || expected == range.end {
                let raw = std::mem::replace(&mut chunk, Vec::with_capacity(self.chunk_frames));
                chunk_bytes = 0;
                for page in self.transform_chunk(raw).await? {
                    encoded_bytes += page.byte_len() as u64;
                    pages.push(page);
                }
            }

            if expected == range.end {
                break;
            }
        }

        if expected != range.end {
            return Err(PipelineError::source_unreadable(format!(
                "frame stream for {} ended at frame {}",
                range, expected
            )));
        }

        stats.frames = pages.len() as u64;
        stats.encoded_bytes = encoded_bytes;
        stats.elapsed_ms = started.elapsed().as_millis() as u64;

        debug!(
            job_id = %job.id,
            batch = %range,
            raw_bytes = stats.raw_bytes,
            encoded_bytes = stats.encoded_bytes,
            elapsed_ms = stats.elapsed_ms,
            "Batch transformed"
        );

        Ok(FrameBatch {
            range,
            frames: pages,
            stats,
        })
    }

    async fn transform_chunk(&self, raw: Vec<RawFrame>) -> PipelineResult<Vec<EncodedFrame>> {
        let config = self.transform;
        let pages = tokio::task::spawn_blocking(move || transform_batch(raw, &config)).await??;
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtx_media::SyntheticFrameSource;
    use vtx_models::{ErrorKind, SourceRef};

    fn job(total_frames: u64) -> Job {
        Job::new(SourceRef::new("synthetic://batch", total_frames as f64 / 3.0), total_frames)
    }

    fn processor(source: SyntheticFrameSource) -> BatchProcessor {
        BatchProcessor::new(Arc::new(source), TransformConfig::default(), 3, 4)
    }

    #[tokio::test]
    async fn test_batch_has_one_page_per_frame() {
        let processor = processor(SyntheticFrameSource::new(8, 6));
        let batch = processor
            .process(&job(100), FrameRange::new(10, 25), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(batch.frames.len(), 15);
        let indices: Vec<u64> = batch.frames.iter().map(|f| f.index).collect();
        assert_eq!(indices, (10..25).collect::<Vec<_>>());
        assert_eq!(batch.stats.frames, 15);
        assert!(batch.stats.encoded_bytes > 0);
    }

    #[tokio::test]
    async fn test_peak_bounded_by_batch_not_job() {
        let processor = processor(SyntheticFrameSource::new(8, 6));
        let cancel = CancellationToken::new();

        let small = processor
            .process(&job(1_000), FrameRange::new(0, 50), &cancel)
            .await
            .unwrap();
        let large = processor
            .process(&job(100_000), FrameRange::new(0, 50), &cancel)
            .await
            .unwrap();

        assert!(small.stats.peak_frames_held <= 50);
        assert_eq!(small.stats.peak_frames_held, large.stats.peak_frames_held);
    }

    #[tokio::test]
    async fn test_truncated_source_fails_whole_batch() {
        let processor = processor(SyntheticFrameSource::new(8, 6).with_available_frames(20));
        let err = processor
            .process(&job(100), FrameRange::new(0, 50), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::SourceUnreadable);
    }

    #[tokio::test]
    async fn test_cancelled_batch_stops() {
        let processor = processor(SyntheticFrameSource::new(8, 6));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = processor
            .process(&job(100), FrameRange::new(0, 50), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }
}

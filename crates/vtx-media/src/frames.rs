//! Frame sources.
//!
//! A frame source turns a video reference into a lazy stream of raw RGB
//! frames for a half-open frame-index range, sampled at a fixed rate. Any
//! range can be opened directly, so a resumed job never decodes from frame 0.
//!
//! Declared durations are rounded up to whole frames and container durations
//! are often a little off, so a source that runs dry within one second of
//! the declared end is padded by repeating its last frame. A larger shortfall
//! is a `Truncated` error.

use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use vtx_models::FrameRange;

use crate::command::{check_ffmpeg, FfmpegCommand};
use crate::error::{MediaError, MediaResult};
use crate::probe::probe_video;

/// Stderr kept for error reports.
const STDERR_LIMIT: u64 = 64 * 1024;

/// One decoded frame, packed RGB24.
#[derive(Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

impl RawFrame {
    pub fn byte_len(&self) -> usize {
        self.rgb.len()
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgb.len())
            .finish()
    }
}

/// Lazy frame stream; ends after the last requested frame or the first error.
pub type FrameStream = BoxStream<'static, MediaResult<RawFrame>>;

/// What to decode.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRequest {
    pub uri: String,
    /// Frames to produce
    pub range: FrameRange,
    /// Declared frame count of the whole video
    pub total_frames: u64,
    /// Sampling rate in frames per second
    pub fps: u32,
}

impl FrameRequest {
    /// Frames a source may pad at the declared end.
    pub fn pad_tolerance(&self) -> u64 {
        u64::from(self.fps)
    }

    /// Whether a source that ran dry at `next` may be padded to the end.
    pub fn may_pad_from(&self, next: u64) -> bool {
        self.total_frames.saturating_sub(next) <= self.pad_tolerance()
    }

    fn truncated_at(&self, next: u64) -> MediaError {
        MediaError::Truncated {
            ended_at: next,
            expected: self.total_frames,
            missing: self.total_frames.saturating_sub(next),
        }
    }
}

/// Producer of sampled frames.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn open(&self, request: &FrameRequest) -> MediaResult<FrameStream>;
}

/// Frame source running the `ffmpeg` CLI.
///
/// Each `open` seeks to `range.start / fps` seconds and lets the `fps`
/// filter resample, so the output rate does not depend on the source rate.
#[derive(Debug, Default)]
pub struct FfmpegFrameSource {
    geometry: Mutex<Option<(String, (u32, u32))>>,
}

impl FfmpegFrameSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame size of `uri`, probed once per source.
    async fn geometry(&self, uri: &str) -> MediaResult<(u32, u32)> {
        let cached = {
            let guard = self.geometry.lock().unwrap_or_else(|e| e.into_inner());
            guard
                .as_ref()
                .filter(|(cached_uri, _)| cached_uri == uri)
                .map(|(_, size)| *size)
        };
        if let Some(size) = cached {
            return Ok(size);
        }

        let info = probe_video(uri).await?;
        let size = info.display_size();
        *self.geometry.lock().unwrap_or_else(|e| e.into_inner()) = Some((uri.to_string(), size));
        Ok(size)
    }
}

/// Decode `count` sampled frames from `first` as raw RGB24.
///
/// The scale filter pins the output to the probed display size, so the
/// frame length read from the pipe always matches the reported geometry.
fn extract_command(
    request: &FrameRequest,
    first: u64,
    count: u64,
    (width, height): (u32, u32),
) -> FfmpegCommand {
    FfmpegCommand::new(request.uri.clone())
        .seek(first as f64 / f64::from(request.fps))
        .video_filter(format!("fps={},scale={}:{}", request.fps, width, height))
        .frame_count(count)
        .raw_rgb24()
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn open(&self, request: &FrameRequest) -> MediaResult<FrameStream> {
        if request.range.is_empty() {
            return Ok(stream::empty().boxed());
        }
        check_ffmpeg()?;
        let (width, height) = self.geometry(&request.uri).await?;

        // Near the declared end, decode one frame early so there is always
        // a frame to repeat if the source runs dry.
        let lead_in = request.range.start > 0 && request.may_pad_from(request.range.end);
        let first = request.range.start - u64::from(lead_in);
        let count = request.range.end - first;

        let args = extract_command(request, first, count, (width, height)).build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("Failed to capture FFmpeg stdout", None, None))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("Failed to capture FFmpeg stderr", None, None))?;

        let reader = PipeReader {
            request: request.clone(),
            child,
            stdout: BufReader::new(stdout),
            stderr: Some(tokio::spawn(collect_stderr(stderr))),
            frame_len: width as usize * height as usize * 3,
            width,
            height,
            next: request.range.start,
            skip_lead_in: lead_in,
            last: None,
            exhausted: false,
            done: false,
        };

        Ok(stream::unfold(reader, |mut reader| async move {
            reader.next_frame().await.map(|item| (item, reader))
        })
        .boxed())
    }
}

async fn collect_stderr(stderr: impl AsyncRead + Unpin) -> String {
    let mut buf = Vec::new();
    let mut limited = stderr.take(STDERR_LIMIT);
    let _ = limited.read_to_end(&mut buf).await;
    // Keep draining so FFmpeg never blocks on a full pipe.
    let mut rest = limited.into_inner();
    let _ = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await;
    String::from_utf8_lossy(&buf).into_owned()
}

struct PipeReader {
    request: FrameRequest,
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
    frame_len: usize,
    width: u32,
    height: u32,
    next: u64,
    skip_lead_in: bool,
    /// Last decoded frame, kept only near the declared end
    last: Option<Vec<u8>>,
    exhausted: bool,
    done: bool,
}

impl PipeReader {
    async fn next_frame(&mut self) -> Option<MediaResult<RawFrame>> {
        if self.done || self.next >= self.request.range.end {
            return None;
        }
        let item = self.step().await;
        if item.is_err() {
            self.done = true;
        }
        Some(item)
    }

    async fn step(&mut self) -> MediaResult<RawFrame> {
        if !self.exhausted {
            loop {
                match self.read_frame().await? {
                    Some(rgb) if self.skip_lead_in => {
                        self.skip_lead_in = false;
                        self.last = Some(rgb);
                    }
                    Some(rgb) => {
                        if self.request.may_pad_from(self.next + 1) {
                            self.last = Some(rgb.clone());
                        }
                        return Ok(self.emit(rgb));
                    }
                    None => {
                        self.finish_process().await?;
                        self.exhausted = true;
                        break;
                    }
                }
            }
        }

        // Source ran dry before the end of the range.
        match &self.last {
            Some(rgb) if self.request.may_pad_from(self.next) => {
                if self.next + 1 == self.request.range.end {
                    warn!(
                        "Source {} ended early; padded to frame {}",
                        self.request.uri, self.next
                    );
                }
                let rgb = rgb.clone();
                Ok(self.emit(rgb))
            }
            _ => Err(self.request.truncated_at(self.next)),
        }
    }

    fn emit(&mut self, rgb: Vec<u8>) -> RawFrame {
        let frame = RawFrame {
            index: self.next,
            width: self.width,
            height: self.height,
            rgb,
        };
        self.next += 1;
        frame
    }

    /// Next whole frame, `None` at end of stream. A trailing partial frame
    /// counts as end of stream.
    async fn read_frame(&mut self) -> MediaResult<Option<Vec<u8>>> {
        let mut buf = vec![0u8; self.frame_len];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .stdout
                .read(&mut buf[filled..])
                .await
                .map_err(|e| MediaError::SourceInterrupted(e.to_string()))?;
            if n == 0 {
                if filled > 0 {
                    debug!("Discarding {} trailing bytes of a partial frame", filled);
                }
                return Ok(None);
            }
            filled += n;
        }
        Ok(Some(buf))
    }

    async fn finish_process(&mut self) -> MediaResult<()> {
        let status = self.child.wait().await?;
        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        if status.success() {
            Ok(())
        } else {
            Err(MediaError::from_decoder_exit(stderr, status.code()))
        }
    }
}

/// Deterministic in-memory frames, used by tests and dry runs.
///
/// `available_frames` limits how many frames the "video" really has, to
/// exercise the short-source rules.
#[derive(Debug, Clone)]
pub struct SyntheticFrameSource {
    pub width: u32,
    pub height: u32,
    pub available_frames: Option<u64>,
}

impl SyntheticFrameSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            available_frames: None,
        }
    }

    pub fn with_available_frames(mut self, frames: u64) -> Self {
        self.available_frames = Some(frames);
        self
    }

    /// Pixel data for frame `index`.
    pub fn render(&self, index: u64) -> Vec<u8> {
        let shade = (index % 251) as u8;
        let mut rgb = vec![0u8; self.width as usize * self.height as usize * 3];
        for (i, px) in rgb.chunks_exact_mut(3).enumerate() {
            px[0] = shade;
            px[1] = (i % 256) as u8;
            px[2] = 255 - shade;
        }
        rgb
    }
}

#[async_trait]
impl FrameSource for SyntheticFrameSource {
    async fn open(&self, request: &FrameRequest) -> MediaResult<FrameStream> {
        let source = self.clone();
        let request = request.clone();
        let available = self.available_frames.unwrap_or(request.total_frames);

        let frames = stream::iter(request.range.start..request.range.end).map(move |index| {
            let decoded = if index < available {
                index
            } else if available > 0 && request.may_pad_from(available) {
                available - 1
            } else {
                return Err(request.truncated_at(available.min(index)));
            };
            Ok(RawFrame {
                index,
                width: source.width,
                height: source.height,
                rgb: source.render(decoded),
            })
        });

        // Stop at the first error, like the FFmpeg source.
        let mut failed = false;
        Ok(frames
            .take_while(move |item| {
                let keep = !failed;
                failed |= item.is_err();
                futures::future::ready(keep)
            })
            .boxed())
    }
}

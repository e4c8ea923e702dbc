//! Frame sampling and page encoding.
//!
//! This crate provides:
//! - FFmpeg command building and FFprobe inspection
//! - The `FrameSource` trait: lazy, restartable frame streams at a fixed
//!   sampling rate, with an FFmpeg-backed and a synthetic implementation
//! - Per-frame downscale and JPEG re-encode

pub mod command;
pub mod error;
pub mod frames;
pub mod probe;
pub mod transform;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand};
pub use error::{MediaError, MediaResult};
pub use frames::{
    FfmpegFrameSource, FrameRequest, FrameSource, FrameStream, RawFrame, SyntheticFrameSource,
};
pub use probe::{probe_video, VideoInfo};
pub use transform::{transform_batch, transform_frame, EncodedFrame, TransformConfig};

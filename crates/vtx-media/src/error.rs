//! Error types for media operations.

use thiserror::Error;
use vtx_models::ErrorKind;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during frame extraction and encoding.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    /// Reading a remote source failed at the network level.
    #[error("Source read interrupted: {0}")]
    SourceInterrupted(String),

    #[error("Invalid video: {0}")]
    InvalidVideo(String),

    #[error("Source ended at frame {ended_at}, {missing} frames short of {expected}")]
    Truncated {
        ended_at: u64,
        expected: u64,
        missing: u64,
    },

    #[error("Encode failed: {0}")]
    EncodeFailed(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn encode_failed(message: impl Into<String>) -> Self {
        Self::EncodeFailed(message.into())
    }

    /// Build the error for a failed FFmpeg/FFprobe run from its stderr.
    ///
    /// Network failures of remote inputs are the only decoder failures
    /// worth retrying, and stderr is the only place FFmpeg reports them.
    pub fn from_decoder_exit(stderr: String, exit_code: Option<i32>) -> Self {
        const NETWORK_SIGNATURES: &[&str] = &[
            "Connection reset",
            "Connection refused",
            "Connection timed out",
            "Operation timed out",
            "Network is unreachable",
            "Server returned 5",
            "Server returned 429",
            "I/O error",
        ];
        if NETWORK_SIGNATURES.iter().any(|s| stderr.contains(s)) {
            return Self::SourceInterrupted(stderr.trim().to_string());
        }
        Self::ffmpeg_failed("FFmpeg exited with non-zero status", Some(stderr), exit_code)
    }

    /// Classification used by the retry layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MediaError::SourceInterrupted(_) | MediaError::Timeout(_) | MediaError::Io(_) => {
                ErrorKind::TransientIo
            }
            MediaError::FfmpegFailed { .. }
            | MediaError::FfprobeFailed { .. }
            | MediaError::InvalidVideo(_)
            | MediaError::Truncated { .. }
            | MediaError::JsonParse(_) => ErrorKind::SourceUnreadable,
            MediaError::FfmpegNotFound
            | MediaError::FfprobeNotFound
            | MediaError::EncodeFailed(_) => ErrorKind::InvariantViolation,
        }
    }
}

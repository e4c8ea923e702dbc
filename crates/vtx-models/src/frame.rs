//! Frame indexing.
//!
//! Frames are addressed by their index in the sampled sequence, not by the
//! source's native frame numbers. Frame `i` sits at `i / SAMPLING_FPS`
//! seconds into the source.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Frames sampled per second of source video.
pub const SAMPLING_FPS: u32 = 3;

/// Number of sampled frames for a declared duration: `ceil(duration * fps)`.
///
/// Returns `None` for non-finite or non-positive durations.
pub fn total_frames_for(duration_secs: f64, fps: u32) -> Option<u64> {
    if !duration_secs.is_finite() || duration_secs <= 0.0 || fps == 0 {
        return None;
    }
    let frames = (duration_secs * fps as f64).ceil();
    if frames > u64::MAX as f64 {
        return None;
    }
    Some(frames as u64)
}

/// Half-open range of frame indices `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct FrameRange {
    pub start: u64,
    pub end: u64,
}

impl FrameRange {
    /// Create a new range. `end` is clamped to be at least `start`.
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Number of frames in the range.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, frame: u64) -> bool {
        frame >= self.start && frame < self.end
    }

    /// Overlap of two ranges, if any.
    pub fn intersect(&self, other: &FrameRange) -> Option<FrameRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(FrameRange { start, end })
    }

    /// Whether `other` lies entirely inside this range.
    pub fn covers(&self, other: &FrameRange) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// Consecutive windows of at most `size` frames covering the range.
    pub fn windows(&self, size: u64) -> impl Iterator<Item = FrameRange> + '_ {
        let size = size.max(1);
        let end = self.end;
        (self.start..end)
            .step_by(size as usize)
            .map(move |start| FrameRange::new(start, (start + size).min(end)))
    }
}

impl fmt::Display for FrameRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_frames_rounds_up() {
        assert_eq!(total_frames_for(600.0, 3), Some(1800));
        assert_eq!(total_frames_for(0.1, 3), Some(1));
        assert_eq!(total_frames_for(10.5, 3), Some(32));
        assert_eq!(total_frames_for(10_800.0, 3), Some(32_400));
    }

    #[test]
    fn test_total_frames_rejects_invalid() {
        assert_eq!(total_frames_for(0.0, 3), None);
        assert_eq!(total_frames_for(-5.0, 3), None);
        assert_eq!(total_frames_for(f64::NAN, 3), None);
        assert_eq!(total_frames_for(f64::INFINITY, 3), None);
        assert_eq!(total_frames_for(10.0, 0), None);
    }

    #[test]
    fn test_intersect() {
        let a = FrameRange::new(0, 500);
        let b = FrameRange::new(400, 900);
        assert_eq!(a.intersect(&b), Some(FrameRange::new(400, 500)));
        assert_eq!(a.intersect(&FrameRange::new(500, 600)), None);
    }

    #[test]
    fn test_windows_last_partial() {
        let windows: Vec<_> = FrameRange::new(0, 1800).windows(500).collect();
        assert_eq!(windows.len(), 4);
        assert_eq!(windows[3], FrameRange::new(1500, 1800));

        let resumed: Vec<_> = FrameRange::new(1000, 1800).windows(500).collect();
        assert_eq!(resumed[0], FrameRange::new(1000, 1500));
    }
}

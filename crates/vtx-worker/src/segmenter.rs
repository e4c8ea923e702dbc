//! Segment planning.
//!
//! A plan depends only on the declared duration and the thresholds, so
//! planning the same job twice yields the same segments. Boundaries fall on
//! whole seconds of sampled video, except the final one.

use vtx_models::{total_frames_for, FrameRange, JobId, SegmentPlan};

use crate::config::SegmentThresholds;
use crate::error::{PipelineError, PipelineResult};

/// Compute `total_frames` and the segment plan for a job.
pub fn plan_segments(
    job_id: &JobId,
    duration_secs: f64,
    fps: u32,
    thresholds: &SegmentThresholds,
) -> PipelineResult<(u64, Vec<SegmentPlan>)> {
    let total_frames = total_frames_for(duration_secs, fps).ok_or_else(|| {
        PipelineError::invariant(format!("invalid declared duration: {}", duration_secs))
    })?;
    if duration_secs > thresholds.max_declared_duration_secs {
        return Err(PipelineError::invariant(format!(
            "declared duration {}s exceeds the {}s limit",
            duration_secs, thresholds.max_declared_duration_secs
        )));
    }
    let fps = u64::from(fps);
    if thresholds.chunk_frames == 0 || thresholds.chunk_frames % fps != 0 {
        return Err(PipelineError::invariant(format!(
            "chunk size {} is not a whole number of seconds at {} fps",
            thresholds.chunk_frames, fps
        )));
    }

    let boundaries = if duration_secs < thresholds.single_segment_below_secs {
        vec![0, total_frames]
    } else if duration_secs <= thresholds.chunked_above_secs {
        equal_share_boundaries(total_frames, fps, thresholds)
    } else {
        let count = total_frames.div_ceil(thresholds.chunk_frames);
        if count > thresholds.max_segments {
            return Err(PipelineError::invariant(format!(
                "{} segments exceed the limit of {}",
                count, thresholds.max_segments
            )));
        }
        chunk_boundaries(total_frames, thresholds.chunk_frames)
    };

    let plans = boundaries
        .windows(2)
        .enumerate()
        .map(|(i, pair)| SegmentPlan::new(job_id, i as u32, FrameRange::new(pair[0], pair[1])))
        .collect();

    Ok((total_frames, plans))
}

/// Fewest equal shares within the configured bounds that keep each segment
/// no longer than one chunk.
fn equal_share_boundaries(total_frames: u64, fps: u64, t: &SegmentThresholds) -> Vec<u64> {
    let seconds = total_frames.div_ceil(fps);
    let min = u64::from(t.min_equal_segments.max(1));
    let max = u64::from(t.max_equal_segments).max(min);
    let n = (min..=max)
        .find(|n| seconds.div_ceil(*n) * fps <= t.chunk_frames)
        .unwrap_or(max);

    let mut boundaries: Vec<u64> = (0..n)
        // round(i * seconds / n), in integers
        .map(|i| ((2 * i * seconds + n) / (2 * n)) * fps)
        .map(|b| b.min(total_frames))
        .collect();
    boundaries.push(total_frames);
    boundaries.dedup();
    boundaries
}

fn chunk_boundaries(total_frames: u64, chunk_frames: u64) -> Vec<u64> {
    let mut boundaries: Vec<u64> = (0..total_frames).step_by(chunk_frames as usize).collect();
    boundaries.push(total_frames);
    boundaries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(duration: f64) -> (u64, Vec<SegmentPlan>) {
        plan_segments(
            &JobId::from_string("job"),
            duration,
            3,
            &SegmentThresholds::default(),
        )
        .unwrap()
    }

    fn assert_tiles(total: u64, plans: &[SegmentPlan]) {
        assert_eq!(plans.first().unwrap().range.start, 0);
        assert_eq!(plans.last().unwrap().range.end, total);
        for (i, pair) in plans.windows(2).enumerate() {
            assert_eq!(pair[0].range.end, pair[1].range.start);
            assert!(!pair[0].range.is_empty());
            assert_eq!(pair[0].index as usize, i);
            assert_eq!(pair[0].range.end % 3, 0, "boundary not on a whole second");
        }
    }

    #[test]
    fn test_short_video_is_one_segment() {
        let (total, plans) = plan(600.0);
        assert_eq!(total, 1800);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].range, FrameRange::new(0, 1800));

        let (total, plans) = plan(1799.9);
        assert_eq!(plans.len(), 1);
        assert_tiles(total, &plans);
    }

    #[test]
    fn test_fractional_duration_rounds_frames_up() {
        let (total, _) = plan(10.1);
        assert_eq!(total, 31);
    }

    #[test]
    fn test_medium_videos_split_evenly() {
        // Exactly 30 minutes belongs to the equal-share bucket.
        let (total, plans) = plan(1800.0);
        assert_eq!(plans.len(), 3);
        assert_tiles(total, &plans);
        assert!(plans.iter().all(|p| p.range.len() == 1800));

        let (total, plans) = plan(5400.0);
        assert_eq!(plans.len(), 3);
        assert_tiles(total, &plans);

        // 105 minutes in thirds would exceed a 30-minute chunk.
        let (total, plans) = plan(6300.0);
        assert_eq!(plans.len(), 4);
        assert_tiles(total, &plans);
        assert!(plans.iter().all(|p| p.range.len() <= 5400));
    }

    #[test]
    fn test_two_hour_boundary_agrees_with_chunking() {
        let (total, plans) = plan(7200.0);
        assert_eq!(total, 21_600);
        assert_eq!(plans.len(), 4);
        assert!(plans.iter().all(|p| p.range.len() == 5400));
    }

    #[test]
    fn test_long_video_is_chunked() {
        let (total, plans) = plan(3.0 * 3600.0);
        assert_eq!(total, 32_400);
        assert_eq!(plans.len(), 6);
        assert!(plans.iter().all(|p| p.range.len() == 5400));

        let (total, plans) = plan(7200.5);
        assert_eq!(total, 21_602);
        assert_eq!(plans.len(), 5);
        assert_eq!(plans[4].range, FrameRange::new(21_600, 21_602));
        assert_tiles(total, &plans);
    }

    #[test]
    fn test_plan_is_deterministic() {
        for duration in [59.0, 1800.0, 4321.7, 7200.0, 10_000.3] {
            let (ta, a) = plan(duration);
            let (tb, b) = plan(duration);
            assert_eq!(ta, tb);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_artifact_ids_follow_index() {
        let (_, plans) = plan(3.0 * 3600.0);
        assert_eq!(plans[5].artifact_id.as_str(), "job-s005");
    }

    #[test]
    fn test_every_duration_tiles_within_bounds() {
        // Every 7 seconds from 1s to 4h.
        for secs in (1..=4 * 3600).step_by(7) {
            let duration = secs as f64;
            let (total, plans) = plan(duration);
            assert_eq!(total, secs * 3);
            assert_tiles(total, &plans);

            let expected = if duration < 1800.0 {
                1..=1
            } else if duration <= 7200.0 {
                3..=4
            } else {
                let n = total.div_ceil(5400) as usize;
                n..=n
            };
            assert!(
                expected.contains(&plans.len()),
                "{}s planned {} segments",
                secs,
                plans.len()
            );
            assert!(
                plans.iter().all(|p| p.range.len() <= 5400),
                "{}s has a segment over one chunk",
                secs
            );
        }
    }

    #[test]
    fn test_duration_over_limit_rejected() {
        let job_id = JobId::from_string("job");
        let t = SegmentThresholds::default();
        for duration in [t.max_declared_duration_secs + 1.0, 1e9, 1e16, 1e18] {
            let err = plan_segments(&job_id, duration, 3, &t).unwrap_err();
            assert_eq!(err.kind, vtx_models::ErrorKind::InvariantViolation);
        }
        assert!(plan_segments(&job_id, t.max_declared_duration_secs, 3, &t).is_ok());
    }

    #[test]
    fn test_segment_count_bounded_before_planning() {
        let job_id = JobId::from_string("job");
        let t = SegmentThresholds {
            max_declared_duration_secs: f64::MAX,
            max_segments: 10,
            ..SegmentThresholds::default()
        };
        // 11 chunks of 30 minutes
        let err = plan_segments(&job_id, 11.0 * 1800.0, 3, &t).unwrap_err();
        assert_eq!(err.kind, vtx_models::ErrorKind::InvariantViolation);
        let err = plan_segments(&job_id, 1e16, 3, &t).unwrap_err();
        assert_eq!(err.kind, vtx_models::ErrorKind::InvariantViolation);

        let (_, plans) = plan_segments(&job_id, 10.0 * 1800.0, 3, &t).unwrap();
        assert_eq!(plans.len(), 10);
    }

    #[test]
    fn test_invalid_durations_rejected() {
        let job_id = JobId::from_string("job");
        let t = SegmentThresholds::default();
        for duration in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            assert!(plan_segments(&job_id, duration, 3, &t).is_err());
        }
    }
}

use rand::Rng;

use crate::{BeatCutError, CandidateClip, Result, Segment, TrimmedSegmentClip};

/// What allocation does when the pool runs dry before every segment is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExhaustionPolicy {
    /// Stop early and drop the remaining segments.
    #[default]
    DropRemaining,
    /// Refuse to allocate at all when there are fewer candidates than segments.
    Fail,
}

impl ExhaustionPolicy {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            Self::Fail
        } else {
            Self::DropRemaining
        }
    }
}

/// Candidates still available to a run. Each clip leaves the pool the moment
/// it is drawn, so no clip is used twice.
#[derive(Debug)]
pub struct CandidatePool<R> {
    clips: Vec<CandidateClip>,
    rng: R,
}

impl<R: Rng> CandidatePool<R> {
    pub fn new(clips: Vec<CandidateClip>, rng: R) -> Self {
        Self { clips, rng }
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn remaining(&self) -> &[CandidateClip] {
        &self.clips
    }

    /// Draws one clip uniformly at random and removes it.
    pub fn take_random(&mut self) -> Option<CandidateClip> {
        if self.clips.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..self.clips.len());
        Some(self.clips.swap_remove(index))
    }
}

/// Window of width `min(segment, clip)` centred on the clip's own midpoint.
/// The segment's position on the main timeline plays no part.
pub fn trim_window(clip_duration: f64, segment_duration: f64) -> (f64, f64) {
    let mid = clip_duration / 2.0;
    let half = segment_duration / 2.0;
    let start = (mid - half).max(0.0);
    let end = (mid + half).min(clip_duration);
    (start, end)
}

/// Fills segments in order with one freshly drawn, trimmed clip each.
pub fn allocate<R: Rng>(
    segments: &[Segment],
    pool: &mut CandidatePool<R>,
    policy: ExhaustionPolicy,
) -> Result<Vec<TrimmedSegmentClip>> {
    if policy == ExhaustionPolicy::Fail && pool.len() < segments.len() {
        return Err(BeatCutError::InsufficientCandidates {
            segments: segments.len(),
            candidates: pool.len(),
        });
    }

    let mut trimmed = Vec::with_capacity(segments.len().min(pool.len()));
    for (index, segment) in segments.iter().enumerate() {
        let Some(clip) = pool.take_random() else {
            tracing::warn!(
                dropped = segments.len() - index,
                "candidate pool exhausted; remaining segments dropped"
            );
            break;
        };

        let (start, end) = trim_window(clip.duration(), segment.duration());
        if end - start < segment.duration() {
            tracing::debug!(
                clip = clip.id,
                clip_duration = clip.duration(),
                segment_duration = segment.duration(),
                "clip shorter than its segment; using the whole clip"
            );
        }
        trimmed.push(clip.subclip(start, end));
    }

    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, path::PathBuf};

    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::{FrameSize, MediaInfo};

    fn clip(id: usize, duration: f64) -> CandidateClip {
        CandidateClip::new(
            id,
            MediaInfo {
                path: PathBuf::from(format!("clip{id}.mp4")),
                duration,
                frame_size: FrameSize {
                    width: 320,
                    height: 240,
                },
                frame_rate: 24.0,
                has_audio: true,
            },
        )
    }

    fn pool(durations: &[f64], seed: u64) -> CandidatePool<StdRng> {
        let clips = durations
            .iter()
            .enumerate()
            .map(|(id, duration)| clip(id, *duration))
            .collect();
        CandidatePool::new(clips, StdRng::seed_from_u64(seed))
    }

    fn segments(bounds: &[f64]) -> Vec<Segment> {
        bounds
            .windows(2)
            .map(|pair| Segment {
                start: pair[0],
                end: pair[1],
            })
            .collect()
    }

    #[test]
    fn more_candidates_than_segments_leaves_a_remainder() {
        let mut pool = pool(&[5.0; 5], 7);
        let trimmed = allocate(
            &segments(&[0.0, 0.5, 1.2, 2.0]),
            &mut pool,
            ExhaustionPolicy::DropRemaining,
        )
        .unwrap();

        assert_eq!(trimmed.len(), 3);
        assert_eq!(pool.len(), 2);
        for (piece, want) in trimmed.iter().zip([0.5, 0.7, 0.8]) {
            assert!((piece.duration() - want).abs() < 1e-9);
        }
    }

    #[test]
    fn exhausted_pool_drops_remaining_segments() {
        let mut pool = pool(&[4.0], 1);
        let trimmed = allocate(
            &segments(&[0.0, 1.0, 2.0, 3.0]),
            &mut pool,
            ExhaustionPolicy::DropRemaining,
        )
        .unwrap();

        assert_eq!(trimmed.len(), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn strict_policy_refuses_without_consuming() {
        let mut pool = pool(&[4.0, 4.0], 1);
        let err = allocate(&segments(&[0.0, 1.0, 2.0, 3.0]), &mut pool, ExhaustionPolicy::Fail)
            .unwrap_err();

        assert_eq!(err.kind(), crate::ErrorKind::InsufficientCandidates);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn no_clip_is_drawn_twice() {
        let mut pool = pool(&[3.0; 20], 99);
        let bounds: Vec<f64> = (0..=20).map(|i| i as f64 * 0.25).collect();
        let trimmed = allocate(&segments(&bounds), &mut pool, ExhaustionPolicy::Fail).unwrap();

        let ids: HashSet<usize> = trimmed.iter().map(|piece| piece.clip.id).collect();
        assert_eq!(ids.len(), 20);
        assert!(pool.is_empty());
    }

    #[test]
    fn same_seed_draws_the_same_order() {
        let bounds = [0.0, 0.3, 0.6, 0.9];
        let order = |seed| {
            let mut pool = pool(&[2.0; 6], seed);
            allocate(&segments(&bounds), &mut pool, ExhaustionPolicy::DropRemaining)
                .unwrap()
                .into_iter()
                .map(|piece| piece.clip.id)
                .collect::<Vec<_>>()
        };
        assert_eq!(order(42), order(42));
    }

    #[test]
    fn window_is_centred_on_the_clip_midpoint() {
        assert_eq!(trim_window(4.0, 1.0), (1.5, 2.5));
        assert_eq!(trim_window(1.0, 3.0), (0.0, 1.0));
        assert_eq!(trim_window(2.0, 2.0), (0.0, 2.0));
    }

    #[test]
    fn window_stays_inside_the_clip() {
        for clip_duration in [0.2, 1.0, 3.7, 10.0] {
            for segment_duration in [0.01, 0.5, 1.0, 4.0, 12.0] {
                let (start, end) = trim_window(clip_duration, segment_duration);
                assert!(0.0 <= start && start <= end && end <= clip_duration);
                let expected = segment_duration.min(clip_duration);
                assert!((end - start - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn short_clip_fills_what_it_can() {
        let mut pool = pool(&[1.0], 3);
        let trimmed = allocate(
            &segments(&[2.0, 5.0]),
            &mut pool,
            ExhaustionPolicy::DropRemaining,
        )
        .unwrap();

        assert_eq!((trimmed[0].sub_start, trimmed[0].sub_end), (0.0, 1.0));
    }
}

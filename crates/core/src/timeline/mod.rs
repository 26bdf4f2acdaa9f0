use serde::{Deserialize, Serialize};

use crate::{BeatCutError, Result};

/// Strictly increasing, non-negative beat timestamps in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct BeatTimeline {
    times: Vec<f64>,
}

impl BeatTimeline {
    /// Validates ordering and length. Fewer than two beats cannot form a segment.
    pub fn new(times: Vec<f64>) -> Result<Self> {
        if times.len() < 2 {
            return Err(BeatCutError::InsufficientSignal(format!(
                "detected {} beat(s); at least 2 are needed to form a segment",
                times.len()
            )));
        }
        if times.iter().any(|time| !time.is_finite() || *time < 0.0) {
            return Err(BeatCutError::msg("beat timestamps must be finite and non-negative"));
        }
        if times.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(BeatCutError::msg("beat timestamps must be strictly increasing"));
        }
        Ok(Self { times })
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Average beats per minute implied by the detected beats.
    pub fn mean_bpm(&self) -> f64 {
        let span = self.times[self.times.len() - 1] - self.times[0];
        60.0 * (self.times.len() - 1) as f64 / span
    }
}

impl TryFrom<Vec<f64>> for BeatTimeline {
    type Error = BeatCutError;

    fn try_from(value: Vec<f64>) -> Result<Self> {
        Self::new(value)
    }
}

impl From<BeatTimeline> for Vec<f64> {
    fn from(value: BeatTimeline) -> Self {
        value.times
    }
}

/// Interval of the main timeline bounded by two consecutive beats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// One segment per pair of consecutive beats, in beat order. Segments may be
/// arbitrarily short; the remainder after the last beat is not covered.
pub fn plan_segments(beats: &BeatTimeline) -> Vec<Segment> {
    beats
        .times()
        .windows(2)
        .map(|pair| Segment {
            start: pair[0],
            end: pair[1],
        })
        .collect()
}

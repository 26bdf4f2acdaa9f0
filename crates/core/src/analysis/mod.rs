use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{AnalysisConfig, AudioTrack, BeatCutError, BeatTimeline, Result};

/// Width of the log-normal tempo prior, in octaves.
const TEMPO_PRIOR_STD: f32 = 1.0;
/// Fraction of the median peak a cumulative score must reach to end the beat path.
const LAST_BEAT_RATIO: f32 = 0.5;
/// Timestamps closer than this are treated as one beat.
const DEDUP_EPSILON: f64 = 1e-6;

/// Output of a beat/tempo analysis primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoEstimate {
    pub tempo_bpm: f32,
    /// Beat positions as indices into the analysis frame grid.
    pub beat_frames: Vec<usize>,
    /// Samples between consecutive analysis frames.
    pub hop_length: usize,
}

impl TempoEstimate {
    pub fn frames_to_seconds(&self, sample_rate: u32) -> Vec<f64> {
        self.beat_frames
            .iter()
            .map(|frame| (*frame * self.hop_length) as f64 / f64::from(sample_rate))
            .collect()
    }
}

/// Signal-analysis seam: estimates a global tempo and beat-aligned frames.
pub trait BeatAnalyzer {
    fn analyze(&mut self, samples: &[f32], sample_rate: u32) -> Result<TempoEstimate>;
}

/// Beat timeline together with the analyzer's global tempo estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedBeats {
    pub timeline: BeatTimeline,
    pub tempo_bpm: f32,
}

/// Runs `analyzer` over the track and converts its frames into a validated
/// [`BeatTimeline`]. Fails with `InsufficientSignal` on silence or fewer than
/// two beats.
pub fn detect_beats(track: &AudioTrack, analyzer: &mut dyn BeatAnalyzer) -> Result<DetectedBeats> {
    if track.is_silent() {
        return Err(BeatCutError::InsufficientSignal(
            "main audio track is silent".to_string(),
        ));
    }

    let estimate = analyzer.analyze(track.samples(), track.sample_rate())?;
    let mut times: Vec<f64> = estimate
        .frames_to_seconds(track.sample_rate())
        .into_iter()
        .filter(|time| time.is_finite() && *time >= 0.0)
        .collect();
    times.sort_by(f64::total_cmp);
    times.dedup_by(|next, prev| (*next - *prev).abs() < DEDUP_EPSILON);

    tracing::info!(
        tempo_bpm = estimate.tempo_bpm,
        beats = times.len(),
        "beat detection finished"
    );
    Ok(DetectedBeats {
        timeline: BeatTimeline::new(times)?,
        tempo_bpm: estimate.tempo_bpm,
    })
}

/// Default analyzer: spectral-flux onset envelope, autocorrelation tempo
/// estimate and a dynamic-programming beat tracker.
pub struct OnsetBeatTracker {
    config: AnalysisConfig,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl OnsetBeatTracker {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Frames per second of the onset envelope.
    fn frame_rate(&self, sample_rate: u32) -> f32 {
        sample_rate as f32 / self.config.hop_length as f32
    }

    /// Log-magnitude spectral flux, one value per hop. Frames are centred, so
    /// frame `t` sits at `t * hop_length` samples.
    pub fn onset_envelope(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let window = self.config.window_size;
        let hop = self.config.hop_length.max(1);
        if samples.len() < window {
            return Err(BeatCutError::InsufficientSignal(format!(
                "audio holds {} samples, shorter than one {window}-sample analysis window",
                samples.len()
            )));
        }

        let pad = window / 2;
        let mut padded = vec![0.0_f32; samples.len() + 2 * pad];
        padded[pad..pad + samples.len()].copy_from_slice(samples);

        let frame_count = 1 + (padded.len() - window) / hop;
        let fft = self.prepare_fft(window);
        let mut previous: Option<Vec<f32>> = None;
        let mut envelope = Vec::with_capacity(frame_count);

        for frame in 0..frame_count {
            let start = frame * hop;
            for (index, value) in padded[start..start + window].iter().enumerate() {
                fft.input[index] = *value * hann_value(index, window);
            }
            fft.plan
                .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)
                .map_err(|err| BeatCutError::msg(format!("fft failed: {err}")))?;

            let log_magnitudes: Vec<f32> = fft
                .spectrum
                .iter()
                .map(|bin| (1.0 + bin.norm()).ln())
                .collect();

            let flux = match &previous {
                Some(prev) => log_magnitudes
                    .iter()
                    .zip(prev)
                    .map(|(current, last)| (current - last).max(0.0))
                    .sum::<f32>(),
                None => 0.0,
            };
            envelope.push(flux);
            previous = Some(log_magnitudes);
        }

        Ok(envelope)
    }

    /// Picks the autocorrelation lag (in frames) that best matches a tempo
    /// inside the configured range, weighted towards `start_bpm`.
    pub fn estimate_tempo(&self, envelope: &[f32], sample_rate: u32) -> f32 {
        let fps = self.frame_rate(sample_rate);
        let min_lag = ((60.0 * fps / self.config.max_bpm).round() as usize).max(1);
        let max_lag = ((60.0 * fps / self.config.min_bpm).round() as usize)
            .min(envelope.len().saturating_sub(1));

        let mut best: Option<(usize, f32)> = None;
        for lag in min_lag..=max_lag {
            let overlap = envelope.len() - lag;
            let correlation: f32 = envelope[..overlap]
                .iter()
                .zip(&envelope[lag..])
                .map(|(a, b)| a * b)
                .sum::<f32>()
                / overlap as f32;

            let bpm = 60.0 * fps / lag as f32;
            let octaves = (bpm / self.config.start_bpm).log2() / TEMPO_PRIOR_STD;
            let weighted = correlation * (-0.5 * octaves * octaves).exp();

            if best.map_or(true, |(_, score)| weighted > score) {
                best = Some((lag, weighted));
            }
        }

        match best {
            Some((lag, score)) if score > 0.0 => 60.0 * fps / lag as f32,
            _ => self.config.start_bpm,
        }
    }

    /// Dynamic-programming beat tracker over a normalised onset envelope.
    pub fn track_beats(&self, envelope: &[f32], tempo_bpm: f32, sample_rate: u32) -> Vec<usize> {
        if envelope.is_empty() || tempo_bpm <= 0.0 {
            return Vec::new();
        }

        let period = 60.0 * self.frame_rate(sample_rate) / tempo_bpm;
        // A beat period longer than the whole envelope cannot place two beats.
        if !period.is_finite() || period <= 0.0 || period > envelope.len() as f32 {
            return Vec::new();
        }
        let local_score = smooth_onsets(envelope, period);

        let earliest = (2.0 * period).round() as usize;
        let latest = ((period / 2.0).round() as usize).max(1);
        let mut backlink: Vec<Option<usize>> = vec![None; local_score.len()];
        let mut cumulative = vec![0.0_f32; local_score.len()];

        for i in 0..local_score.len() {
            let mut best: Option<(usize, f32)> = None;
            if i >= latest {
                for prev in i.saturating_sub(earliest)..=(i - latest) {
                    let gap = (i - prev) as f32;
                    let deviation = (gap / period).ln();
                    let score =
                        cumulative[prev] - self.config.tightness * deviation * deviation;
                    if best.map_or(true, |(_, top)| score > top) {
                        best = Some((prev, score));
                    }
                }
            }

            match best {
                Some((prev, score)) => {
                    cumulative[i] = local_score[i] + score;
                    backlink[i] = Some(prev);
                }
                None => cumulative[i] = local_score[i],
            }
        }

        let Some(mut cursor) = last_beat(&cumulative) else {
            return Vec::new();
        };
        let mut beats = vec![cursor];
        while let Some(prev) = backlink[cursor] {
            beats.push(prev);
            cursor = prev;
        }
        beats.reverse();

        trim_weak_beats(&beats, &local_score)
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        let rebuild = self
            .fft
            .as_ref()
            .map(|fft| fft.size != size)
            .unwrap_or(true);
        if rebuild {
            self.fft = None;
        }

        let planner = &mut self.fft_planner;
        self.fft.get_or_insert_with(|| {
            let plan = planner.plan_fft_forward(size);
            let scratch = plan.make_scratch_vec();
            let spectrum = plan.make_output_vec();
            let input = plan.make_input_vec();
            FftResources {
                size,
                plan,
                scratch,
                spectrum,
                input,
            }
        })
    }
}

impl BeatAnalyzer for OnsetBeatTracker {
    fn analyze(&mut self, samples: &[f32], sample_rate: u32) -> Result<TempoEstimate> {
        self.config.validate()?;
        if sample_rate == 0 {
            return Err(BeatCutError::msg("cannot analyse audio at a 0 Hz sample rate"));
        }
        let envelope = self.onset_envelope(samples)?;
        let std_dev = standard_deviation(&envelope);
        if std_dev <= f32::EPSILON {
            return Err(BeatCutError::InsufficientSignal(
                "onset envelope is flat; no rhythmic events found".to_string(),
            ));
        }
        let normalised: Vec<f32> = envelope.iter().map(|value| value / std_dev).collect();

        let tempo_bpm = self.estimate_tempo(&normalised, sample_rate);
        let beat_frames = self.track_beats(&normalised, tempo_bpm, sample_rate);
        tracing::debug!(
            tempo_bpm,
            frames = normalised.len(),
            beats = beat_frames.len(),
            "onset analysis complete"
        );

        Ok(TempoEstimate {
            tempo_bpm,
            beat_frames,
            hop_length: self.config.hop_length,
        })
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for OnsetBeatTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnsetBeatTracker")
            .field("config", &self.config)
            .field("fft", &self.fft)
            .finish()
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

/// Convolves the envelope with a gaussian one period wide.
fn smooth_onsets(envelope: &[f32], period: f32) -> Vec<f32> {
    let half = period.round().max(1.0) as isize;
    let kernel: Vec<f32> = (-half..=half)
        .map(|offset| {
            let x = offset as f32 * 32.0 / period;
            (-0.5 * x * x).exp()
        })
        .collect();

    (0..envelope.len() as isize)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(k, weight)| {
                    let source = i + k as isize - half;
                    usize::try_from(source)
                        .ok()
                        .and_then(|index| envelope.get(index))
                        .map(|value| value * weight)
                })
                .sum::<f32>()
        })
        .collect()
}

/// Last local maximum of the cumulative score that clears half the median peak.
fn last_beat(cumulative: &[f32]) -> Option<usize> {
    let peaks: Vec<usize> = (0..cumulative.len())
        .filter(|&i| {
            let left = i == 0 || cumulative[i] > cumulative[i - 1];
            let right = i + 1 == cumulative.len() || cumulative[i] >= cumulative[i + 1];
            left && right
        })
        .collect();
    if peaks.is_empty() {
        return None;
    }

    let mut scores: Vec<f32> = peaks.iter().map(|&i| cumulative[i]).collect();
    scores.sort_by(f32::total_cmp);
    let median = scores[scores.len() / 2];

    peaks
        .into_iter()
        .rev()
        .find(|&i| cumulative[i] >= LAST_BEAT_RATIO * median)
}

/// Drops leading and trailing beats whose onset strength is under half the
/// RMS strength of the whole path.
fn trim_weak_beats(beats: &[usize], local_score: &[f32]) -> Vec<usize> {
    if beats.is_empty() {
        return Vec::new();
    }
    let strengths: Vec<f32> = beats.iter().map(|&beat| local_score[beat]).collect();
    let threshold = 0.5 * compute_rms(&strengths);

    let first = strengths.iter().position(|s| *s > threshold);
    let last = strengths.iter().rposition(|s| *s > threshold);
    match (first, last) {
        (Some(first), Some(last)) => beats[first..=last].to_vec(),
        _ => Vec::new(),
    }
}

fn standard_deviation(values: &[f32]) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    let variance = values
        .iter()
        .map(|value| (value - mean) * (value - mean))
        .sum::<f32>()
        / (values.len() - 1) as f32;
    variance.sqrt()
}

fn compute_rms(samples: &[f32]) -> f32 {
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{record::ExportSettings, BeatCutError, Result};

/// Top-level configuration structure for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub output_path: PathBuf,
    /// Where the extracted main-audio waveform is written for analysis.
    pub audio_artifact_path: PathBuf,
    /// Frame rate every candidate clip is normalised to.
    pub candidate_fps: f64,
    /// Fail with `InsufficientCandidates` instead of dropping unfilled segments.
    pub strict: bool,
    /// Seed for clip selection. `None` draws from OS entropy.
    pub seed: Option<u64>,
    pub analysis: AnalysisConfig,
    pub export: ExportSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("final_video.mp4"),
            audio_artifact_path: PathBuf::from("main_audio.wav"),
            candidate_fps: 24.0,
            strict: false,
            seed: None,
            analysis: AnalysisConfig::default(),
            export: ExportSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Reads a JSON configuration file. Missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.candidate_fps.is_finite() && self.candidate_fps > 0.0) {
            return Err(invalid(format!(
                "candidate_fps must be positive, got {}",
                self.candidate_fps
            )));
        }
        self.analysis.validate()
    }
}

/// Configuration specific to the beat analysis subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Rate the main audio is resampled to before analysis.
    pub sample_rate: u32,
    pub window_size: usize,
    pub hop_length: usize,
    pub start_bpm: f32,
    pub min_bpm: f32,
    pub max_bpm: f32,
    /// How strongly the beat tracker sticks to the estimated tempo.
    pub tightness: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22_050,
            window_size: 2048,
            hop_length: 512,
            start_bpm: 120.0,
            min_bpm: 30.0,
            max_bpm: 300.0,
            tightness: 100.0,
        }
    }
}

impl AnalysisConfig {
    /// Rejects settings the beat tracker cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(invalid("analysis.sample_rate must be non-zero"));
        }
        if self.window_size == 0 {
            return Err(invalid("analysis.window_size must be non-zero"));
        }
        if self.hop_length == 0 {
            return Err(invalid("analysis.hop_length must be non-zero"));
        }
        let positive = |value: f32| value.is_finite() && value > 0.0;
        if !positive(self.min_bpm) || !positive(self.max_bpm) || self.max_bpm <= self.min_bpm {
            return Err(invalid(format!(
                "analysis tempo range {}..{} bpm must be positive and increasing",
                self.min_bpm, self.max_bpm
            )));
        }
        if !positive(self.start_bpm) {
            return Err(invalid("analysis.start_bpm must be positive"));
        }
        if !(self.tightness.is_finite() && self.tightness >= 0.0) {
            return Err(invalid("analysis.tightness must be non-negative"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> BeatCutError {
    BeatCutError::InvalidConfig(message.into())
}

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::{BeatCutError, Result};

/// Amplitude under which a track is treated as silence.
const SILENCE_FLOOR: f32 = 1e-4;

/// Decoded mono waveform at a fixed sample rate. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioTrack {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(BeatCutError::msg("audio track requires a non-zero sample rate"));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Averages interleaved frames of `channels` samples down to a single channel.
    pub fn from_interleaved(interleaved: &[f32], channels: u16, sample_rate: u32) -> Result<Self> {
        let channels = usize::from(channels.max(1));
        let samples = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        Self::new(samples, sample_rate)
    }

    /// Reads a PCM or float WAV file, downmixing to mono.
    pub fn read_wav(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = WavReader::open(path)
            .map_err(|err| BeatCutError::unreadable(path, err.to_string()))?;
        let spec = reader.spec();

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()?,
            SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|value| value as f32 / scale))
                    .collect::<std::result::Result<_, _>>()?
            }
        };

        tracing::debug!(
            path = %path.display(),
            channels = spec.channels,
            sample_rate = spec.sample_rate,
            "decoded wav artifact"
        );
        Self::from_interleaved(&interleaved, spec.channels, spec.sample_rate)
    }

    /// Writes the track as 16-bit mono PCM.
    pub fn write_wav(&self, path: impl AsRef<Path>) -> Result<()> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec)?;
        for sample in &self.samples {
            writer.write_sample((sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16)?;
        }
        writer.finalize()?;
        Ok(())
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    pub fn peak(&self) -> f32 {
        self.samples
            .iter()
            .fold(0.0_f32, |peak, sample| peak.max(sample.abs()))
    }

    pub fn is_silent(&self) -> bool {
        self.peak() <= SILENCE_FLOOR
    }
}

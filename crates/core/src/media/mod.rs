//! Media handles and the toolkit seam used to probe, extract and encode.
//!
//! Clips are edit descriptions rather than decoded frames: resizing, frame
//! rate conversion and trimming are recorded on the value and realised by the
//! toolkit when the final artifact is written.

mod ffmpeg;

use std::{fmt, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{AudioTrack, ExportSettings, FinalArtifact, Result};

pub use ffmpeg::{render_args, FfmpegToolkit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// What a probe learns about a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub path: PathBuf,
    pub duration: f64,
    pub frame_size: FrameSize,
    pub frame_rate: f64,
    pub has_audio: bool,
}

/// Media decode, audio extraction and encode primitives.
pub trait MediaToolkit {
    /// Fails with `UnreadableMedia` when the file has no decodable video.
    fn probe(&self, path: &Path) -> Result<MediaInfo>;

    /// Writes the source's audio as a mono waveform at `sample_rate` to
    /// `artifact` and returns the decoded track.
    fn extract_audio(&self, source: &MediaInfo, artifact: &Path, sample_rate: u32)
        -> Result<AudioTrack>;

    /// Encodes the artifact to `output`, replacing any existing file.
    fn write_video_file(
        &self,
        artifact: &FinalArtifact,
        output: &Path,
        settings: &ExportSettings,
    ) -> Result<()>;
}

/// A candidate clip normalised for allocation. Its own audio never reaches
/// the output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateClip {
    /// Position in the caller's candidate list; identity within a pool.
    pub id: usize,
    pub source: MediaInfo,
    pub frame_size: FrameSize,
    pub frame_rate: f64,
}

impl CandidateClip {
    pub fn new(id: usize, source: MediaInfo) -> Self {
        Self {
            id,
            frame_size: source.frame_size,
            frame_rate: source.frame_rate,
            source,
        }
    }

    pub fn resize(mut self, target: FrameSize) -> Self {
        self.frame_size = target;
        self
    }

    pub fn set_frame_rate(mut self, fps: f64) -> Self {
        self.frame_rate = fps;
        self
    }

    pub fn duration(&self) -> f64 {
        self.source.duration
    }

    pub fn path(&self) -> &Path {
        &self.source.path
    }

    /// Restricts the clip to `[start, end]` of its own timeline, without audio.
    pub fn subclip(self, start: f64, end: f64) -> TrimmedSegmentClip {
        TrimmedSegmentClip {
            clip: self,
            sub_start: start,
            sub_end: end,
        }
    }
}

/// Silent sub-interval of a candidate clip that fills one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrimmedSegmentClip {
    pub clip: CandidateClip,
    pub sub_start: f64,
    pub sub_end: f64,
}

impl TrimmedSegmentClip {
    pub fn duration(&self) -> f64 {
        self.sub_end - self.sub_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(path: &str, duration: f64) -> MediaInfo {
        MediaInfo {
            path: PathBuf::from(path),
            duration,
            frame_size: FrameSize {
                width: 640,
                height: 360,
            },
            frame_rate: 30.0,
            has_audio: true,
        }
    }

    #[test]
    fn normalisation_is_recorded_on_the_clip() {
        let target = FrameSize {
            width: 1920,
            height: 1080,
        };
        let clip = CandidateClip::new(3, info("b.mov", 4.0))
            .resize(target)
            .set_frame_rate(24.0);

        assert_eq!(clip.frame_size, target);
        assert_eq!(clip.frame_rate, 24.0);
        assert_eq!(clip.source.frame_size.width, 640);
        assert_eq!(clip.clone().subclip(1.0, 2.5).duration(), 1.5);
        assert_eq!(target.to_string(), "1920x1080");
    }
}

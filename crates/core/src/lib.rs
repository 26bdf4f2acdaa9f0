//! Core library for the beatcut video assembler.
//!
//! A run detects the beats of a main video's soundtrack, splits the main
//! timeline into beat-bounded segments, fills each segment with a trimmed,
//! randomly drawn candidate clip and writes the concatenation back out with
//! the main soundtrack attached. Each module owns one stage (analysis,
//! segment planning, allocation, assembly) or one seam (media toolkit,
//! configuration, errors); [`pipeline`] ties them together.

pub mod analysis;
pub mod assemble;
pub mod audio;
pub mod config;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod pool;
pub mod record;
pub mod timeline;

pub use analysis::{detect_beats, BeatAnalyzer, DetectedBeats, OnsetBeatTracker, TempoEstimate};
pub use assemble::{assemble, AssembledVideo, AudioSpan, FinalArtifact};
pub use audio::AudioTrack;
pub use config::{AnalysisConfig, PipelineConfig};
pub use error::{BeatCutError, ErrorKind, Result};
pub use media::{
    CandidateClip, FfmpegToolkit, FrameSize, MediaInfo, MediaToolkit, TrimmedSegmentClip,
};
pub use pipeline::{
    NullSink, Pipeline, PipelineState, ProgressSink, RunContext, RunReport, RunRequest,
};
pub use pool::{allocate, trim_window, CandidatePool, ExhaustionPolicy};
pub use record::ExportSettings;
pub use timeline::{plan_segments, BeatTimeline, Segment};

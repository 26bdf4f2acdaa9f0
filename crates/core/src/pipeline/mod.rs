//! Linear, synchronous orchestration of the four stages.
//!
//! A run moves `Idle -> AudioExtracted -> BeatsDetected -> SegmentsPlanned ->
//! ClipsAllocated -> Assembled -> Exported`, or drops to `Failed` from any
//! stage. All per-run state lives in a [`RunContext`] that is discarded when
//! [`Pipeline::run`] returns. Callers that need a responsive UI should run
//! the whole thing on a worker thread and forward the [`ProgressSink`]
//! callbacks.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    analysis::{detect_beats, BeatAnalyzer, OnsetBeatTracker},
    assemble::assemble,
    pool::{allocate, CandidatePool, ExhaustionPolicy},
    timeline::plan_segments,
    AudioTrack, BeatCutError, BeatTimeline, CandidateClip, ErrorKind, FinalArtifact, MediaInfo,
    MediaToolkit, PipelineConfig, Result, Segment, TrimmedSegmentClip,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    Idle,
    AudioExtracted,
    BeatsDetected,
    SegmentsPlanned,
    ClipsAllocated,
    Assembled,
    Exported,
    Failed,
}

impl PipelineState {
    /// The stage that follows this one on the success path.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::AudioExtracted),
            Self::AudioExtracted => Some(Self::BeatsDetected),
            Self::BeatsDetected => Some(Self::SegmentsPlanned),
            Self::SegmentsPlanned => Some(Self::ClipsAllocated),
            Self::ClipsAllocated => Some(Self::Assembled),
            Self::Assembled => Some(Self::Exported),
            Self::Exported | Self::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exported | Self::Failed)
    }

    pub fn can_transition_to(self, to: Self) -> bool {
        match to {
            Self::Failed => !self.is_terminal(),
            _ => self.next() == Some(to),
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AudioExtracted => "audio-extraction",
            Self::BeatsDetected => "beat-detection",
            Self::SegmentsPlanned => "segment-planning",
            Self::ClipsAllocated => "clip-allocation",
            Self::Assembled => "assembly",
            Self::Exported => "export",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Coarse callbacks for whoever drives the run.
pub trait ProgressSink {
    fn on_progress(&mut self, percent: u8);
    fn on_status(&mut self, message: &str);
    fn on_complete(&mut self, output: &Path);
    fn on_error(&mut self, kind: ErrorKind, message: &str);
}

/// Sink that ignores every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_progress(&mut self, _percent: u8) {}
    fn on_status(&mut self, _message: &str) {}
    fn on_complete(&mut self, _output: &Path) {}
    fn on_error(&mut self, _kind: ErrorKind, _message: &str) {}
}

/// Sources chosen by the caller. Both must be present before a run starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub main_video: Option<PathBuf>,
    pub candidates: Vec<PathBuf>,
}

impl RunRequest {
    pub fn new(main_video: impl Into<PathBuf>, candidates: Vec<PathBuf>) -> Self {
        Self {
            main_video: Some(main_video.into()),
            candidates,
        }
    }

    fn validate(&self) -> Result<&Path> {
        let main = self
            .main_video
            .as_deref()
            .ok_or(BeatCutError::MissingInput("main video not selected"))?;
        if self.candidates.is_empty() {
            return Err(BeatCutError::MissingInput("no candidate clips selected"));
        }
        Ok(main)
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub output_path: PathBuf,
    pub audio_artifact_path: PathBuf,
    pub beats: usize,
    /// Global tempo reported by the beat analyzer.
    pub tempo_bpm: f32,
    pub segments: usize,
    pub clips_used: usize,
    pub candidates_unused: usize,
    pub duration: f64,
}

/// Per-run state handed from stage to stage.
#[derive(Debug)]
pub struct RunContext {
    state: PipelineState,
    pub main: Option<MediaInfo>,
    pub audio: Option<AudioTrack>,
    pub beats: Option<BeatTimeline>,
    pub tempo_bpm: Option<f32>,
    pub segments: Vec<Segment>,
    pub trimmed: Vec<TrimmedSegmentClip>,
    pub candidates_unused: usize,
    pub artifact: Option<FinalArtifact>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Idle,
            main: None,
            audio: None,
            beats: None,
            tempo_bpm: None,
            segments: Vec::new(),
            trimmed: Vec::new(),
            candidates_unused: 0,
            artifact: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn advance(&mut self, to: PipelineState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(BeatCutError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::debug!(from = %self.state, to = %to, "pipeline transition");
        self.state = to;
        Ok(())
    }

    fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = PipelineState::Failed;
        }
    }

    fn take<T>(slot: &mut Option<T>, what: &'static str) -> Result<T> {
        slot.take()
            .ok_or_else(|| BeatCutError::msg(format!("{what} missing from run context")))
    }
}

/// Beat-synchronised assembly pipeline over a media toolkit and beat analyzer.
pub struct Pipeline<M> {
    config: PipelineConfig,
    toolkit: M,
    analyzer: Box<dyn BeatAnalyzer>,
}

impl<M: MediaToolkit> Pipeline<M> {
    /// Uses the built-in onset beat tracker configured from `config.analysis`.
    pub fn new(config: PipelineConfig, toolkit: M) -> Self {
        let analyzer = Box::new(OnsetBeatTracker::new(config.analysis.clone()));
        Self {
            config,
            toolkit,
            analyzer,
        }
    }

    pub fn with_analyzer(mut self, analyzer: impl BeatAnalyzer + 'static) -> Self {
        self.analyzer = Box::new(analyzer);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs once with selection seeded from `config.seed`, or from OS entropy.
    pub fn run(&mut self, request: &RunRequest, sink: &mut dyn ProgressSink) -> Result<RunReport> {
        let rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self.run_with_rng(request, rng, sink)
    }

    pub fn run_with_rng<R: Rng>(
        &mut self,
        request: &RunRequest,
        rng: R,
        sink: &mut dyn ProgressSink,
    ) -> Result<RunReport> {
        let main_path = match self.config.validate().and_then(|()| request.validate()) {
            Ok(path) => path,
            Err(err) => {
                sink.on_status(&err.to_string());
                sink.on_error(err.kind(), &err.to_string());
                return Err(err);
            }
        };

        let mut ctx = RunContext::new();
        match self.execute(&mut ctx, main_path, &request.candidates, rng, sink) {
            Ok(report) => {
                sink.on_status(&format!(
                    "Final video saved at {}",
                    report.output_path.display()
                ));
                sink.on_complete(&report.output_path);
                Ok(report)
            }
            Err(err) => {
                let stage = ctx.state().next().unwrap_or(PipelineState::Failed);
                ctx.fail();
                let err = err.at_stage(stage);
                tracing::error!(%stage, error = %err, "run failed");
                sink.on_status(&err.to_string());
                sink.on_error(err.kind(), &err.to_string());
                Err(err)
            }
        }
    }

    fn execute<R: Rng>(
        &mut self,
        ctx: &mut RunContext,
        main_path: &Path,
        candidates: &[PathBuf],
        rng: R,
        sink: &mut dyn ProgressSink,
    ) -> Result<RunReport> {
        sink.on_status("Processing...");
        sink.on_progress(10);

        self.extract_audio(ctx, main_path)?;
        sink.on_status("Detecting beats");
        sink.on_progress(30);

        self.detect_beats(ctx)?;
        self.plan_segments(ctx)?;
        sink.on_status(&format!("Planned {} segments", ctx.segments.len()));
        sink.on_progress(45);

        self.allocate_clips(ctx, candidates, rng)?;
        sink.on_status(&format!("Allocated {} clips", ctx.trimmed.len()));
        sink.on_progress(60);

        self.assemble(ctx)?;
        sink.on_status("Encoding final video");
        let report = self.export(ctx)?;
        sink.on_progress(100);
        Ok(report)
    }

    fn extract_audio(&mut self, ctx: &mut RunContext, main_path: &Path) -> Result<()> {
        let main = self.toolkit.probe(main_path)?;
        if !main.has_audio {
            return Err(BeatCutError::unreadable(main_path, "main video has no audio track"));
        }
        let audio = self.toolkit.extract_audio(
            &main,
            &self.config.audio_artifact_path,
            self.config.analysis.sample_rate,
        )?;
        tracing::info!(
            main = %main.path.display(),
            duration = main.duration,
            audio_seconds = audio.duration_seconds(),
            "main video decoded"
        );
        ctx.main = Some(main);
        ctx.audio = Some(audio);
        ctx.advance(PipelineState::AudioExtracted)
    }

    fn detect_beats(&mut self, ctx: &mut RunContext) -> Result<()> {
        let audio = RunContext::take(&mut ctx.audio, "main audio")?;
        let detected = detect_beats(&audio, self.analyzer.as_mut())?;
        ctx.tempo_bpm = Some(detected.tempo_bpm);
        ctx.beats = Some(detected.timeline);
        ctx.advance(PipelineState::BeatsDetected)
    }

    fn plan_segments(&mut self, ctx: &mut RunContext) -> Result<()> {
        let beats = ctx
            .beats
            .as_ref()
            .ok_or_else(|| BeatCutError::msg("beat timeline missing from run context"))?;
        ctx.segments = plan_segments(beats);
        tracing::info!(segments = ctx.segments.len(), "segments planned");
        ctx.advance(PipelineState::SegmentsPlanned)
    }

    fn allocate_clips<R: Rng>(
        &mut self,
        ctx: &mut RunContext,
        candidates: &[PathBuf],
        rng: R,
    ) -> Result<()> {
        let main = ctx
            .main
            .as_ref()
            .ok_or_else(|| BeatCutError::msg("main video missing from run context"))?;

        let clips = candidates
            .iter()
            .enumerate()
            .map(|(id, path)| {
                let info = self.toolkit.probe(path)?;
                Ok(CandidateClip::new(id, info)
                    .resize(main.frame_size)
                    .set_frame_rate(self.config.candidate_fps))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut pool = CandidatePool::new(clips, rng);
        let policy = ExhaustionPolicy::from_strict(self.config.strict);
        ctx.trimmed = allocate(&ctx.segments, &mut pool, policy)?;
        ctx.candidates_unused = pool.len();
        tracing::info!(
            allocated = ctx.trimmed.len(),
            unused = pool.len(),
            "clips allocated"
        );
        ctx.advance(PipelineState::ClipsAllocated)
    }

    fn assemble(&mut self, ctx: &mut RunContext) -> Result<()> {
        let main = ctx
            .main
            .as_ref()
            .ok_or_else(|| BeatCutError::msg("main video missing from run context"))?;
        ctx.artifact = Some(assemble(std::mem::take(&mut ctx.trimmed), main)?);
        ctx.advance(PipelineState::Assembled)
    }

    fn export(&mut self, ctx: &mut RunContext) -> Result<RunReport> {
        let artifact = RunContext::take(&mut ctx.artifact, "final artifact")?;
        let output = &self.config.output_path;

        let existed = output.exists();
        if let Err(err) = self
            .toolkit
            .write_video_file(&artifact, output, &self.config.export)
        {
            // Only clean up a file this run created.
            if !existed && output.exists() {
                tracing::warn!(output = %output.display(), "removing partial output");
                if let Err(cleanup) = std::fs::remove_file(output) {
                    tracing::warn!(
                        output = %output.display(),
                        error = %cleanup,
                        "could not remove partial output"
                    );
                }
            }
            return Err(err);
        }
        ctx.advance(PipelineState::Exported)?;
        tracing::info!(output = %output.display(), duration = artifact.duration(), "export complete");

        Ok(RunReport {
            output_path: output.clone(),
            audio_artifact_path: self.config.audio_artifact_path.clone(),
            beats: ctx.beats.as_ref().map_or(0, BeatTimeline::len),
            tempo_bpm: ctx.tempo_bpm.unwrap_or_default(),
            segments: ctx.segments.len(),
            clips_used: artifact.pieces.len(),
            candidates_unused: ctx.candidates_unused,
            duration: artifact.duration(),
        })
    }
}

impl<M: fmt::Debug> fmt::Debug for Pipeline<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("toolkit", &self.toolkit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::RefCell,
        collections::HashMap,
    };

    use super::*;
    use crate::{analysis::TempoEstimate, ExportSettings, FrameSize};

    /// Toolkit that serves probe results from a table and records renders.
    #[derive(Debug, Default)]
    struct FakeToolkit {
        media: HashMap<PathBuf, MediaInfo>,
        fail_encode: bool,
        /// Leaves a directory at the output path so cleanup cannot remove it.
        jam_output: bool,
        rendered: RefCell<Option<FinalArtifact>>,
    }

    impl FakeToolkit {
        fn with(mut self, path: &str, duration: f64) -> Self {
            let info = MediaInfo {
                path: PathBuf::from(path),
                duration,
                frame_size: FrameSize {
                    width: 1280,
                    height: 720,
                },
                frame_rate: 30.0,
                has_audio: true,
            };
            self.media.insert(info.path.clone(), info);
            self
        }
    }

    impl MediaToolkit for FakeToolkit {
        fn probe(&self, path: &Path) -> Result<MediaInfo> {
            self.media
                .get(path)
                .cloned()
                .ok_or_else(|| BeatCutError::unreadable(path, "not found"))
        }

        fn extract_audio(&self, _: &MediaInfo, artifact: &Path, sample_rate: u32) -> Result<AudioTrack> {
            let track = AudioTrack::new(vec![0.5; sample_rate as usize], sample_rate)?;
            track.write_wav(artifact)?;
            Ok(track)
        }

        fn write_video_file(&self, artifact: &FinalArtifact, output: &Path, _: &ExportSettings) -> Result<()> {
            if self.jam_output {
                std::fs::create_dir(output)?;
                return Err(BeatCutError::Encoding("output path jammed".into()));
            }
            std::fs::write(output, b"partial")?;
            if self.fail_encode {
                return Err(BeatCutError::Encoding("muxer exploded".into()));
            }
            *self.rendered.borrow_mut() = Some(artifact.clone());
            Ok(())
        }
    }

    /// Analyzer that reports beats at fixed times (hop of one sample).
    struct FixedBeats(Vec<f64>);

    impl BeatAnalyzer for FixedBeats {
        fn analyze(&mut self, _: &[f32], sample_rate: u32) -> Result<TempoEstimate> {
            Ok(TempoEstimate {
                tempo_bpm: 120.0,
                beat_frames: self
                    .0
                    .iter()
                    .map(|t| (t * f64::from(sample_rate)).round() as usize)
                    .collect(),
                hop_length: 1,
            })
        }
    }

    #[derive(Debug, Default)]
    struct RecordingSink {
        progress: Vec<u8>,
        completed: Option<PathBuf>,
        errors: Vec<ErrorKind>,
    }

    impl ProgressSink for RecordingSink {
        fn on_progress(&mut self, percent: u8) {
            self.progress.push(percent);
        }
        fn on_status(&mut self, _message: &str) {}
        fn on_complete(&mut self, output: &Path) {
            self.completed = Some(output.to_path_buf());
        }
        fn on_error(&mut self, kind: ErrorKind, _message: &str) {
            self.errors.push(kind);
        }
    }

    fn config(dir: &Path) -> PipelineConfig {
        PipelineConfig {
            output_path: dir.join("final_video.mp4"),
            audio_artifact_path: dir.join("main_audio.wav"),
            analysis: crate::AnalysisConfig {
                sample_rate: 1_000,
                ..Default::default()
            },
            seed: Some(5),
            ..Default::default()
        }
    }

    fn candidates(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("c{i}.mp4"))).collect()
    }

    fn toolkit(n: usize, main_duration: f64) -> FakeToolkit {
        (0..n).fold(FakeToolkit::default().with("main.mp4", main_duration), |kit, i| {
            kit.with(&format!("c{i}.mp4"), 4.0)
        })
    }

    #[test]
    fn full_run_uses_three_of_five_clips() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(config(dir.path()), toolkit(5, 10.0))
            .with_analyzer(FixedBeats(vec![0.0, 0.5, 1.2, 2.0]));
        let mut sink = RecordingSink::default();

        let report = pipeline
            .run(&RunRequest::new("main.mp4", candidates(5)), &mut sink)
            .unwrap();

        assert_eq!(report.beats, 4);
        assert_eq!(report.tempo_bpm, 120.0);
        assert_eq!(report.segments, 3);
        assert_eq!(report.clips_used, 3);
        assert_eq!(report.candidates_unused, 2);
        assert!((report.duration - 2.0).abs() < 1e-9);
        assert_eq!(sink.progress, vec![10, 30, 45, 60, 100]);
        assert_eq!(sink.completed.as_deref(), Some(report.output_path.as_path()));
        assert!(dir.path().join("main_audio.wav").exists());

        let rendered = pipeline.toolkit.rendered.borrow().clone().unwrap();
        assert_eq!(rendered.audio.duration(), rendered.duration());
        assert!(rendered
            .pieces
            .iter()
            .all(|piece| piece.clip.frame_rate == 24.0
                && piece.clip.frame_size == FrameSize { width: 1280, height: 720 }));
    }

    #[test]
    fn single_candidate_fills_only_the_first_segment() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(config(dir.path()), toolkit(1, 10.0))
            .with_analyzer(FixedBeats(vec![0.0, 1.0, 2.0, 3.0]));

        let report = pipeline
            .run(&RunRequest::new("main.mp4", candidates(1)), &mut NullSink)
            .unwrap();

        assert_eq!(report.segments, 3);
        assert_eq!(report.clips_used, 1);
        assert_eq!(report.candidates_unused, 0);
    }

    #[test]
    fn strict_mode_fails_when_candidates_run_short() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.strict = true;
        let mut pipeline = Pipeline::new(config, toolkit(1, 10.0))
            .with_analyzer(FixedBeats(vec![0.0, 1.0, 2.0, 3.0]));

        let err = pipeline
            .run(&RunRequest::new("main.mp4", candidates(1)), &mut NullSink)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientCandidates);
        assert_eq!(err.stage(), Some(PipelineState::ClipsAllocated));
        assert!(!dir.path().join("final_video.mp4").exists());
    }

    #[test]
    fn one_beat_fails_before_planning() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(config(dir.path()), toolkit(3, 10.0))
            .with_analyzer(FixedBeats(vec![0.4]));
        let mut sink = RecordingSink::default();

        let err = pipeline
            .run(&RunRequest::new("main.mp4", candidates(3)), &mut sink)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InsufficientSignal);
        assert_eq!(err.stage(), Some(PipelineState::BeatsDetected));
        assert_eq!(sink.errors, vec![ErrorKind::InsufficientSignal]);
        assert_eq!(sink.progress, vec![10, 30]);
        assert!(!dir.path().join("final_video.mp4").exists());
    }

    #[test]
    fn missing_inputs_stop_before_any_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(config(dir.path()), toolkit(0, 10.0));
        let mut sink = RecordingSink::default();

        let request = RunRequest {
            main_video: Some(PathBuf::from("main.mp4")),
            candidates: Vec::new(),
        };
        let err = pipeline.run(&request, &mut sink).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MissingInput);
        assert_eq!(err.stage(), None);
        assert!(sink.progress.is_empty());
        assert!(!dir.path().join("main_audio.wav").exists());

        let err = pipeline
            .run(&RunRequest::default(), &mut NullSink)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingInput);
    }

    #[test]
    fn unreadable_candidate_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(config(dir.path()), toolkit(1, 10.0))
            .with_analyzer(FixedBeats(vec![0.0, 1.0]));

        let request = RunRequest::new("main.mp4", vec![PathBuf::from("missing.mov")]);
        let err = pipeline.run(&request, &mut NullSink).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnreadableMedia);
        assert_eq!(err.stage(), Some(PipelineState::ClipsAllocated));
    }

    #[test]
    fn failed_encode_leaves_no_output_but_keeps_audio_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut kit = toolkit(2, 10.0);
        kit.fail_encode = true;
        let mut pipeline =
            Pipeline::new(config(dir.path()), kit).with_analyzer(FixedBeats(vec![0.0, 1.0, 2.0]));

        let err = pipeline
            .run(&RunRequest::new("main.mp4", candidates(2)), &mut NullSink)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Encoding);
        assert_eq!(err.stage(), Some(PipelineState::Exported));
        assert!(!dir.path().join("final_video.mp4").exists());
        assert!(dir.path().join("main_audio.wav").exists());
    }

    #[test]
    fn failed_encode_keeps_a_file_that_was_already_there() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("final_video.mp4");
        std::fs::write(&output, b"previous render").unwrap();
        let mut kit = toolkit(2, 10.0);
        kit.fail_encode = true;
        let mut pipeline =
            Pipeline::new(config(dir.path()), kit).with_analyzer(FixedBeats(vec![0.0, 1.0, 2.0]));

        let err = pipeline
            .run(&RunRequest::new("main.mp4", candidates(2)), &mut NullSink)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Encoding);
        assert!(output.exists());
    }

    #[test]
    fn failed_cleanup_still_reports_the_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut kit = toolkit(2, 10.0);
        kit.jam_output = true;
        let mut pipeline =
            Pipeline::new(config(dir.path()), kit).with_analyzer(FixedBeats(vec![0.0, 1.0, 2.0]));
        let mut sink = RecordingSink::default();

        let err = pipeline
            .run(&RunRequest::new("main.mp4", candidates(2)), &mut sink)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Encoding);
        assert_eq!(err.stage(), Some(PipelineState::Exported));
        assert_eq!(sink.errors, vec![ErrorKind::Encoding]);
        assert!(format!("{err}").contains("output path jammed"));
    }

    #[test]
    fn invalid_analysis_config_stops_before_any_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.analysis.hop_length = 0;
        let mut pipeline = Pipeline::new(config, toolkit(2, 10.0));
        let mut sink = RecordingSink::default();

        let err = pipeline
            .run(&RunRequest::new("main.mp4", candidates(2)), &mut sink)
            .unwrap_err();

        assert!(matches!(err, BeatCutError::InvalidConfig(_)));
        assert!(sink.progress.is_empty());
        assert!(!dir.path().join("main_audio.wav").exists());
    }

    #[test]
    fn long_assembly_is_capped_at_main_duration() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(config(dir.path()), toolkit(4, 1.5))
            .with_analyzer(FixedBeats(vec![0.0, 1.0, 2.0, 3.0]));

        let report = pipeline
            .run(&RunRequest::new("main.mp4", candidates(4)), &mut NullSink)
            .unwrap();

        assert!(report.duration <= 1.5 + 1e-9);
        assert!((report.duration - 1.5).abs() < 1e-9);
    }

    #[test]
    fn state_machine_is_linear() {
        let mut ctx = RunContext::new();
        assert!(ctx.advance(PipelineState::BeatsDetected).is_err());
        ctx.advance(PipelineState::AudioExtracted).unwrap();
        assert!(PipelineState::AudioExtracted.can_transition_to(PipelineState::Failed));
        assert!(!PipelineState::Exported.can_transition_to(PipelineState::Failed));
        assert!(!PipelineState::BeatsDetected.can_transition_to(PipelineState::Idle));
        ctx.fail();
        assert_eq!(ctx.state(), PipelineState::Failed);
    }
}

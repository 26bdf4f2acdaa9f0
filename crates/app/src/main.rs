use std::path::{Path, PathBuf};

use beatcut_core::{
    detect_beats, plan_segments, BeatCutError, ErrorKind, FfmpegToolkit, MediaToolkit,
    OnsetBeatTracker, Pipeline, PipelineConfig, ProgressSink, RunRequest,
};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

fn main() -> beatcut_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_assembly(args),
        Commands::Beats {
            input,
            output,
            config,
        } => run_beats(&input, output.as_deref(), config.as_deref()),
    }
}

fn run_assembly(args: RunArgs) -> beatcut_core::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(output) = args.output {
        config.output_path = output;
    }
    if let Some(artifact) = args.audio_artifact {
        config.audio_artifact_path = artifact;
    }
    if let Some(fps) = args.fps {
        config.candidate_fps = fps;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    config.strict |= args.strict;

    tracing::info!(
        main = ?args.main,
        candidates = args.candidates.len(),
        output = ?config.output_path,
        "starting assembly"
    );

    let request = RunRequest {
        main_video: args.main,
        candidates: args.candidates,
    };
    let mut pipeline = Pipeline::new(config, FfmpegToolkit::new());
    let report = pipeline.run(&request, &mut LogSink)?;

    tracing::info!(
        beats = report.beats,
        tempo_bpm = report.tempo_bpm,
        segments = report.segments,
        clips_used = report.clips_used,
        unused = report.candidates_unused,
        duration = report.duration,
        "run finished"
    );
    Ok(())
}

fn run_beats(
    input: &Path,
    output: Option<&Path>,
    config: Option<&Path>,
) -> beatcut_core::Result<()> {
    let config = load_config(config)?;
    tracing::info!(?input, ?output, "running beat analysis");

    let toolkit = FfmpegToolkit::new();
    let main = toolkit.probe(input)?;
    let audio = toolkit.extract_audio(
        &main,
        &config.audio_artifact_path,
        config.analysis.sample_rate,
    )?;

    let mut analyzer = OnsetBeatTracker::new(config.analysis.clone());
    let beats = detect_beats(&audio, &mut analyzer)?;
    let segments = plan_segments(&beats.timeline);

    let report = serde_json::json!({
        "source": main.path,
        "duration": main.duration,
        "tempo_bpm": beats.tempo_bpm,
        "mean_beat_bpm": beats.timeline.mean_bpm(),
        "beats": beats.timeline,
        "segments": segments,
    });
    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|err| BeatCutError::msg(format!("cannot render beat report: {err}")))?;

    match output {
        Some(path) => std::fs::write(path, rendered)?,
        None => println!("{rendered}"),
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> beatcut_core::Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path),
        None => Ok(PipelineConfig::default()),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Forwards pipeline callbacks to the log.
struct LogSink;

impl ProgressSink for LogSink {
    fn on_progress(&mut self, percent: u8) {
        tracing::info!(percent, "progress");
    }

    fn on_status(&mut self, message: &str) {
        tracing::info!("{message}");
    }

    fn on_complete(&mut self, output: &Path) {
        tracing::info!(output = %output.display(), "complete");
    }

    fn on_error(&mut self, kind: ErrorKind, message: &str) {
        tracing::error!(%kind, "{message}");
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Cut clips to the beat of a main video", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Assemble candidate clips over the beat grid of the main video.
    Run(RunArgs),
    /// Detect beats in a video's soundtrack and print the segment plan.
    Beats {
        /// Video whose soundtrack should be analysed.
        input: PathBuf,
        /// Write the JSON report here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Video providing the soundtrack and the timeline.
    #[arg(short, long)]
    main: Option<PathBuf>,
    /// Candidate clips to cut onto the beats.
    candidates: Vec<PathBuf>,
    /// Output video path.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Where the extracted main audio is written.
    #[arg(long)]
    audio_artifact: Option<PathBuf>,
    /// Seed for clip selection.
    #[arg(long)]
    seed: Option<u64>,
    /// Fail instead of dropping segments when candidates run out.
    #[arg(long)]
    strict: bool,
    /// Frame rate candidates are converted to.
    #[arg(long)]
    fps: Option<f64>,
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

use std::{
    path::{Path, PathBuf},
    process::{Command, Output},
};

use serde::Deserialize;

use super::{FrameSize, MediaInfo, MediaToolkit};
use crate::{AudioTrack, BeatCutError, ExportSettings, FinalArtifact, Result};

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: Option<FormatInfo>,
    #[serde(default)]
    streams: Vec<StreamInfo>,
}

#[derive(Debug, Deserialize)]
struct FormatInfo {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamInfo {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

/// [`MediaToolkit`] backed by the `ffprobe` and `ffmpeg` executables.
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegToolkit {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl FfmpegToolkit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses explicit executable paths instead of looking them up on `PATH`.
    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

impl MediaToolkit for FfmpegToolkit {
    fn probe(&self, path: &Path) -> Result<MediaInfo> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration:stream=codec_type,width,height,r_frame_rate,avg_frame_rate",
                "-of",
                "json",
            ])
            .arg(path)
            .output()
            .map_err(|err| {
                BeatCutError::unreadable(path, format!("failed to execute ffprobe: {err}"))
            })?;

        if !output.status.success() {
            return Err(BeatCutError::unreadable(path, stderr_tail(&output)));
        }

        parse_probe(path, &output.stdout)
    }

    fn extract_audio(
        &self,
        source: &MediaInfo,
        artifact: &Path,
        sample_rate: u32,
    ) -> Result<AudioTrack> {
        if let Some(parent) = artifact.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let output = Command::new(&self.ffmpeg)
            .arg("-i")
            .arg(&source.path)
            .args(["-vn", "-acodec", "pcm_s16le", "-ac", "1", "-ar"])
            .arg(sample_rate.to_string())
            .arg("-y")
            .arg(artifact)
            .output()
            .map_err(|err| {
                BeatCutError::unreadable(&source.path, format!("failed to execute ffmpeg: {err}"))
            })?;

        if !output.status.success() {
            return Err(BeatCutError::unreadable(&source.path, stderr_tail(&output)));
        }

        tracing::info!(artifact = %artifact.display(), sample_rate, "extracted main audio");
        AudioTrack::read_wav(artifact)
    }

    fn write_video_file(
        &self,
        artifact: &FinalArtifact,
        output: &Path,
        settings: &ExportSettings,
    ) -> Result<()> {
        let args = render_args(artifact, output, settings)?;
        tracing::debug!(?args, "invoking ffmpeg");

        let result = Command::new(&self.ffmpeg)
            .args(&args)
            .output()
            .map_err(|err| BeatCutError::Encoding(format!("failed to execute ffmpeg: {err}")))?;

        if !result.status.success() {
            return Err(BeatCutError::Encoding(stderr_tail(&result)));
        }
        Ok(())
    }
}

/// Builds the single-pass ffmpeg invocation for an artifact: every piece is
/// trimmed, rescaled and retimed, the pieces are concatenated, and the main
/// video's audio is cut to the artifact's length.
pub fn render_args(
    artifact: &FinalArtifact,
    output: &Path,
    settings: &ExportSettings,
) -> Result<Vec<String>> {
    if artifact.pieces.is_empty() {
        return Err(BeatCutError::Encoding("nothing to encode".to_string()));
    }

    let mut args = Vec::new();
    for piece in &artifact.pieces {
        args.push("-i".to_string());
        args.push(piece.clip.path().to_string_lossy().into_owned());
    }
    let audio_input = artifact.pieces.len();
    args.push("-i".to_string());
    args.push(artifact.audio.source.to_string_lossy().into_owned());

    let FrameSize { width, height } = artifact.frame_size;
    let mut filters = Vec::with_capacity(artifact.pieces.len() + 2);
    let mut labels = String::new();
    for (idx, piece) in artifact.pieces.iter().enumerate() {
        filters.push(format!(
            "[{idx}:v]trim=start={:.6}:end={:.6},setpts=PTS-STARTPTS,scale={width}:{height},setsar=1,fps={}[v{idx}]",
            piece.sub_start, piece.sub_end, piece.clip.frame_rate
        ));
        labels.push_str(&format!("[v{idx}]"));
    }
    filters.push(format!(
        "{labels}concat=n={}:v=1:a=0[outv]",
        artifact.pieces.len()
    ));
    filters.push(format!(
        "[{audio_input}:a]atrim=start={:.6}:end={:.6},asetpts=PTS-STARTPTS[outa]",
        artifact.audio.start, artifact.audio.end
    ));

    args.push("-filter_complex".to_string());
    args.push(filters.join(";"));
    args.extend(
        ["-map", "[outv]", "-map", "[outa]"]
            .iter()
            .map(|arg| arg.to_string()),
    );
    args.extend(settings.encoder_args());
    args.push("-y".to_string());
    args.push(output.to_string_lossy().into_owned());
    Ok(args)
}

fn parse_probe(path: &Path, stdout: &[u8]) -> Result<MediaInfo> {
    let probe: ProbeOutput = serde_json::from_slice(stdout).map_err(|err| {
        BeatCutError::unreadable(path, format!("unexpected ffprobe output: {err}"))
    })?;

    let duration = probe
        .format
        .and_then(|format| format.duration)
        .and_then(|duration| duration.parse::<f64>().ok())
        .filter(|duration| *duration > 0.0)
        .ok_or_else(|| BeatCutError::unreadable(path, "missing or zero duration"))?;

    let video = probe
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| BeatCutError::unreadable(path, "no video stream"))?;

    let frame_size = match (video.width, video.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => FrameSize { width, height },
        _ => return Err(BeatCutError::unreadable(path, "video stream has no frame size")),
    };

    let frame_rate = video
        .r_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| video.avg_frame_rate.as_deref().and_then(parse_rate))
        .unwrap_or(30.0);

    let has_audio = probe
        .streams
        .iter()
        .any(|stream| stream.codec_type.as_deref() == Some("audio"));

    Ok(MediaInfo {
        path: path.to_path_buf(),
        duration,
        frame_size,
        frame_rate,
        has_audio,
    })
}

/// Parses `"30000/1001"` or `"24"` style rates.
fn parse_rate(raw: &str) -> Option<f64> {
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => raw.trim().parse().ok()?,
    };
    (rate > 0.0).then_some(rate)
}

fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().filter(|line| !line.trim().is_empty()).collect();
    let tail = lines[lines.len().saturating_sub(5)..].join("\n");
    if tail.is_empty() {
        format!("process exited with {}", output.status)
    } else {
        tail
    }
}

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{BeatCutError, FrameSize, MediaInfo, Result, TrimmedSegmentClip};

/// Pieces concatenated in segment order, with no audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledVideo {
    pieces: Vec<TrimmedSegmentClip>,
}

impl AssembledVideo {
    pub fn concatenate(pieces: Vec<TrimmedSegmentClip>) -> Self {
        Self { pieces }
    }

    pub fn pieces(&self) -> &[TrimmedSegmentClip] {
        &self.pieces
    }

    pub fn duration(&self) -> f64 {
        self.pieces.iter().map(TrimmedSegmentClip::duration).sum()
    }

    /// Cuts the assembly down to `[0, limit]`, shortening the piece that
    /// reaches the limit and dropping everything after it. The summed
    /// duration never exceeds `limit`.
    pub fn truncate(&mut self, limit: f64) {
        let mut elapsed = 0.0;
        let mut keep = 0;
        for piece in &mut self.pieces {
            let remaining = limit - elapsed;
            if remaining <= TRUNCATE_EPSILON {
                break;
            }
            keep += 1;
            if piece.duration() >= remaining - TRUNCATE_EPSILON {
                piece.sub_end = piece.sub_start + remaining.min(piece.duration());
                clamp_end(piece, elapsed, limit);
                break;
            }
            elapsed += piece.duration();
        }
        self.pieces.truncate(keep);
    }
}

/// Gaps shorter than this are rounding noise, far below one frame.
const TRUNCATE_EPSILON: f64 = 1e-9;

/// Pulls `sub_end` down until `elapsed + duration` no longer rounds above `limit`.
fn clamp_end(piece: &mut TrimmedSegmentClip, elapsed: f64, limit: f64) {
    for _ in 0..64 {
        if elapsed + piece.duration() <= limit || piece.sub_end <= piece.sub_start {
            return;
        }
        piece.sub_end = f64::from_bits(piece.sub_end.to_bits() - 1);
    }
}

/// Slice of the main video's soundtrack attached to the output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSpan {
    pub source: PathBuf,
    pub start: f64,
    pub end: f64,
}

impl AudioSpan {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Everything the encoder needs to write the output file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalArtifact {
    pub pieces: Vec<TrimmedSegmentClip>,
    pub frame_size: FrameSize,
    pub audio: AudioSpan,
}

impl FinalArtifact {
    pub fn duration(&self) -> f64 {
        self.pieces.iter().map(TrimmedSegmentClip::duration).sum()
    }
}

/// Concatenates the pieces, caps the result at the main video's length and
/// reattaches the main audio over exactly the surviving duration. A result
/// shorter than the main video keeps its natural length.
pub fn assemble(trimmed: Vec<TrimmedSegmentClip>, main: &MediaInfo) -> Result<FinalArtifact> {
    if trimmed.is_empty() {
        return Err(BeatCutError::msg("no clips were allocated; nothing to assemble"));
    }
    if !main.has_audio {
        return Err(BeatCutError::unreadable(&main.path, "main video has no audio track"));
    }

    let mut assembled = AssembledVideo::concatenate(trimmed);
    let natural = assembled.duration();
    if natural > main.duration {
        tracing::info!(
            assembled = natural,
            limit = main.duration,
            "assembly longer than main video; truncating"
        );
        assembled.truncate(main.duration);
    }

    let duration = assembled.duration();
    tracing::info!(pieces = assembled.pieces().len(), duration, "assembled video");

    Ok(FinalArtifact {
        pieces: assembled.pieces,
        frame_size: main.frame_size,
        audio: AudioSpan {
            source: main.path.clone(),
            start: 0.0,
            end: duration,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CandidateClip;

    fn info(path: &str, duration: f64) -> MediaInfo {
        MediaInfo {
            path: PathBuf::from(path),
            duration,
            frame_size: FrameSize {
                width: 854,
                height: 480,
            },
            frame_rate: 30.0,
            has_audio: true,
        }
    }

    fn piece(id: usize, start: f64, end: f64) -> TrimmedSegmentClip {
        CandidateClip::new(id, info(&format!("c{id}.mp4"), 10.0)).subclip(start, end)
    }

    #[test]
    fn caps_long_assembly_at_main_duration() {
        let pieces = vec![piece(0, 0.0, 2.0), piece(1, 1.0, 3.0), piece(2, 4.0, 6.0)];
        let artifact = assemble(pieces, &info("main.mp4", 5.0)).unwrap();

        assert_eq!(artifact.pieces.len(), 3);
        assert!((artifact.duration() - 5.0).abs() < 1e-9);
        assert!(artifact.duration() <= 5.0 + 1e-9);
        assert_eq!(artifact.pieces[2].sub_end, 5.0);
        assert_eq!(artifact.audio.duration(), artifact.duration());
    }

    #[test]
    fn drops_pieces_past_the_limit() {
        let mut assembled = AssembledVideo::concatenate(vec![
            piece(0, 0.0, 2.0),
            piece(1, 0.0, 2.0),
            piece(2, 0.0, 2.0),
        ]);
        assembled.truncate(2.0);

        assert_eq!(assembled.pieces().len(), 1);
        assert_eq!(assembled.duration(), 2.0);
    }

    #[test]
    fn truncation_leaves_no_slivers_or_overshoot() {
        for a in 0..400_u32 {
            for b in 0..25_u32 {
                let first = 0.013 * f64::from(a) + 0.1;
                let second = 0.7 + 0.031 * f64::from(b);
                let limit = first + second;
                let mut assembled = AssembledVideo::concatenate(vec![
                    piece(0, 0.3, 0.3 + first),
                    piece(1, 1.1, 1.1 + second),
                    piece(2, 0.2, 1.9),
                ]);
                assembled.truncate(limit);

                assert_eq!(assembled.pieces().len(), 2, "a={a} b={b}");
                assert!(assembled.duration() <= limit, "a={a} b={b}");
                assert!((assembled.duration() - limit).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn short_assembly_keeps_natural_length() {
        let pieces = vec![piece(0, 0.0, 0.5), piece(1, 2.0, 2.7)];
        let main = info("main.mp4", 30.0);
        let artifact = assemble(pieces, &main).unwrap();

        assert!((artifact.duration() - 1.2).abs() < 1e-9);
        assert_eq!(artifact.audio.source, main.path);
        assert_eq!(artifact.audio.start, 0.0);
        assert_eq!(artifact.audio.end, artifact.duration());
        assert_eq!(artifact.frame_size, main.frame_size);
    }

    #[test]
    fn silent_main_video_cannot_lend_audio() {
        let mut main = info("main.mp4", 10.0);
        main.has_audio = false;
        let err = assemble(vec![piece(0, 0.0, 1.0)], &main).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::UnreadableMedia);
    }

    #[test]
    fn empty_allocation_is_rejected() {
        assert!(assemble(Vec::new(), &info("main.mp4", 10.0)).is_err());
    }
}

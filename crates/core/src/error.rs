use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineState;

/// Result alias that carries the custom [`BeatCutError`] type.
pub type Result<T> = std::result::Result<T, BeatCutError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum BeatCutError {
    /// The main video or the candidate pool was not supplied.
    #[error("missing input: {0}")]
    MissingInput(&'static str),
    /// A source file could not be probed or decoded.
    #[error("cannot read media `{}`: {reason}", .path.display())]
    UnreadableMedia { path: PathBuf, reason: String },
    /// The main audio did not produce enough beats to form a segment.
    #[error("insufficient signal: {0}")]
    InsufficientSignal(String),
    /// Strict allocation ran out of candidates before every segment was filled.
    #[error("{candidates} candidate clip(s) cannot fill {segments} segment(s)")]
    InsufficientCandidates { segments: usize, candidates: usize },
    /// The final write failed.
    #[error("encoding failed: {0}")]
    Encoding(String),
    /// A pipeline stage failed; wraps the underlying cause.
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: PipelineState,
        #[source]
        source: Box<BeatCutError>,
    },
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Wav(#[from] hound::Error),
    #[error("cannot parse configuration: {0}")]
    Config(#[from] serde_json::Error),
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{0}")]
    Message(String),
}

/// Coarse classification handed to `on_error` callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    MissingInput,
    UnreadableMedia,
    InsufficientSignal,
    InsufficientCandidates,
    Encoding,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MissingInput => "MissingInputError",
            Self::UnreadableMedia => "UnreadableMediaError",
            Self::InsufficientSignal => "InsufficientSignalError",
            Self::InsufficientCandidates => "InsufficientCandidatesError",
            Self::Encoding => "EncodingError",
            Self::Internal => "InternalError",
        };
        f.write_str(name)
    }
}

impl BeatCutError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn unreadable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::UnreadableMedia {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Attaches the failing stage, unless one is already recorded.
    pub fn at_stage(self, stage: PipelineState) -> Self {
        match self {
            err @ Self::Stage { .. } => err,
            err => Self::Stage {
                stage,
                source: Box::new(err),
            },
        }
    }

    /// Returns the stage that failed, if the error went through the pipeline.
    pub fn stage(&self) -> Option<PipelineState> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingInput(_) => ErrorKind::MissingInput,
            Self::UnreadableMedia { .. } => ErrorKind::UnreadableMedia,
            Self::InsufficientSignal(_) => ErrorKind::InsufficientSignal,
            Self::InsufficientCandidates { .. } => ErrorKind::InsufficientCandidates,
            Self::Encoding(_) => ErrorKind::Encoding,
            Self::Stage { source, .. } => source.kind(),
            Self::InvalidTransition { .. }
            | Self::Io(_)
            | Self::Wav(_)
            | Self::Config(_)
            | Self::InvalidConfig(_)
            | Self::Message(_) => ErrorKind::Internal,
        }
    }
}

impl From<&str> for BeatCutError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for BeatCutError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_wrapping_keeps_inner_kind() {
        let err = BeatCutError::InsufficientSignal("one beat".into())
            .at_stage(PipelineState::BeatsDetected);

        assert_eq!(err.kind(), ErrorKind::InsufficientSignal);
        assert_eq!(err.stage(), Some(PipelineState::BeatsDetected));
        assert!(format!("{err}").contains("one beat"));
    }

    #[test]
    fn rewrapping_keeps_first_stage() {
        let err = BeatCutError::Encoding("disk full".into())
            .at_stage(PipelineState::Exported)
            .at_stage(PipelineState::Failed);

        assert_eq!(err.stage(), Some(PipelineState::Exported));
    }

    #[test]
    fn kind_names_match_reported_errors() {
        assert_eq!(
            ErrorKind::UnreadableMedia.to_string(),
            "UnreadableMediaError"
        );
        assert_eq!(
            BeatCutError::msg("boom").kind(),
            ErrorKind::Internal
        );
    }
}

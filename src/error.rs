use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VoiceError>;

/// Failure modes surfaced by the conversion and separation pipeline.
///
/// Ill-conditioned numerics are never reported here: they are absorbed where
/// they occur (epsilon guards, default formants).
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("missing input: {}", .0.display())]
    MissingInput(PathBuf),
    #[error("insufficient signal: {provided} samples provided, {minimum} required")]
    InsufficientSignal { provided: usize, minimum: usize },
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("operation exceeded its {0:?} budget")]
    Timeout(Duration),
    #[error("cancelled before {0}")]
    Cancelled(&'static str),
    #[error("could not decode audio: {0}")]
    Decode(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

//! Error types for head adaptation and decoding.

use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, HeadError>;

/// Errors raised while running an adapted head.
#[derive(Debug, Error)]
pub enum HeadError {
    #[error("expected {expected} feature maps, got {got}")]
    LevelCount { expected: usize, got: usize },

    #[error("{stage}: expected {expected} channels, got {got}")]
    ChannelMismatch {
        stage: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("batch size mismatch: expected {expected}, got {got}")]
    BatchMismatch { expected: usize, got: usize },

    #[error("invalid head parts: {0}")]
    InvalidParts(String),

    #[error("unknown head kind: {0}")]
    UnknownHeadKind(String),

    #[error("layer failed: {0}")]
    Layer(String),

    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("config parse error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HeadError {
    pub(crate) fn channels(stage: &'static str, expected: usize, got: usize) -> Self {
        Self::ChannelMismatch {
            stage,
            expected,
            got,
        }
    }
}

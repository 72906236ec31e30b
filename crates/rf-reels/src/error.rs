//! Error types for the reel engine

use thiserror::Error;

use crate::layout::ReelId;

/// Reel engine error type
#[derive(Error, Debug)]
pub enum ReelError {
    /// Strip has no 1×1 symbol that can stand in for a broken composite
    #[error("no clobber candidate on strip '{strip}' for reel {reel}")]
    NoClobberCandidate { reel: ReelId, strip: String },

    #[error("unknown reel strip: {0}")]
    UnknownStrip(String),

    #[error("no outcome set for stop sequence")]
    MissingOutcome,

    #[error("invalid outcome: {0}")]
    InvalidOutcome(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("operation not allowed in phase {0}")]
    InvalidPhase(&'static str),

    /// Client window disagrees with the server symbol matrix
    #[error("desync on layer {layer}, reel {column}, row {row}: expected '{expected}', found '{found}'")]
    Desync {
        layer: usize,
        column: usize,
        row: usize,
        expected: String,
        found: String,
    },

    #[error("parse error: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for ReelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<serde_yml::Error> for ReelError {
    fn from(err: serde_yml::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Result type alias
pub type ReelResult<T> = Result<T, ReelError>;

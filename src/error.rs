//! Error types for confgraph
//!
//! Library code returns `PipelineResult<T>`; the binary wraps these in `anyhow`.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// All errors that can occur while resolving or persisting a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    // Document errors
    #[error("Invalid config node at {path}: {reason}")]
    InvalidConfig { path: String, reason: String },

    #[error("Target not found: {target} (at {path})")]
    TargetNotFound { target: String, path: String },

    #[error("Cannot register target: {0}")]
    InvalidTarget(String),

    // Resolution errors
    #[error("Cannot fingerprint argument {argument} of target {target} at {path}: {reason}")]
    Fingerprint {
        target: String,
        path: String,
        argument: String,
        reason: String,
    },

    #[error("Target {target} failed at {path} (arguments: [{}])", .arg_names.join(", "))]
    TargetInvocation {
        target: String,
        path: String,
        arg_names: Vec<String>,
        #[source]
        source: anyhow::Error,
    },

    // Cache persistence errors
    #[error("Failed to load cache record {path}: {reason}")]
    CacheLoad { path: PathBuf, reason: String },

    #[error("Failed to flush cache to {path}: {source}")]
    CacheFlush {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot directory error at {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Target identifier of the failing node, if the error is tied to one
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::TargetNotFound { target, .. }
            | Self::Fingerprint { target, .. }
            | Self::TargetInvocation { target, .. } => Some(target),
            _ => None,
        }
    }
}

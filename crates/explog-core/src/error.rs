//! Error types for explog-core.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExplogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack encode error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Run root {} is not usable: {source}", .path.display())]
    RootUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Run directory already exists: {}", .0.display())]
    RunDirExists(PathBuf),

    /// Raised only after the retry budget is spent, never for a single collision.
    #[error("Could not allocate run directory under {} after {attempts} attempts", .root.display())]
    AllocationExhausted { root: PathBuf, attempts: u32 },

    #[error("No run id after {max} is representable under {}", .root.display())]
    RunIdOverflow { root: PathBuf, max: u64 },

    #[error("Unsupported artifact category: {0}")]
    UnsupportedCategory(String),

    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error("Metric records must be JSON objects, got {0}")]
    InvalidMetrics(String),
}

pub type Result<T> = std::result::Result<T, ExplogError>;

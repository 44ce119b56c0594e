//! explog-core: per-run experiment logging on the filesystem.
//!
//! Each run gets its own numbered directory under `log_dir/log_name`,
//! allocated without locks so that independently launched processes can
//! share a root. The run keeps a `metadata.yaml` snapshot of its config,
//! append-only JSON-lines metric streams and typed artifacts.

pub mod allocator;
pub mod artifacts;
pub mod config;
pub mod error;
pub mod logger;
pub mod metrics;
pub mod models;
pub mod sink;
pub mod storage;

pub use allocator::{AllocationPolicy, ExistingRunPolicy, RunDirectoryAllocator};
pub use artifacts::{
    Artifact, ArtifactCategory, ArrayArchive, Checkpoint, ModelWeights, NdArray, PngFigure,
};
pub use config::{LogsConfig, RunConfig, SystemConfig};
pub use error::ExplogError;
pub use logger::RunLogger;
pub use metrics::{MetricValue, Metrics};
pub use models::AllocatedRun;
pub use sink::OutputSink;

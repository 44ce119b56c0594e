//! Data models shared by the allocator and the logger.

use std::path::PathBuf;

/// A run directory freshly claimed by this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedRun {
    pub run_id: u64,
    pub path: PathBuf,
}

//! Race-tolerant allocation of numbered run directories.
//!
//! Runs live in `root/<id>` where `<id>` is a decimal integer. Without an
//! explicit id the allocator scans for the largest existing id and creates
//! `max + 1`. The scan is not atomic: independent processes may pick the same
//! id, and only the exclusive `create_dir` decides the winner. Losers back off
//! for a random delay, rescan and try again, up to a fixed attempt budget.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, info};

use crate::config::AllocationSettings;
use crate::error::{ExplogError, Result};
use crate::models::AllocatedRun;

/// What to do when an explicitly requested run directory already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExistingRunPolicy {
    /// Refuse with [`ExplogError::RunDirExists`].
    #[default]
    Fail,
    /// Resume into the existing directory.
    Reuse,
}

/// Retry budget and backoff for automatic id allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationPolicy {
    /// Total `create_dir` attempts before giving up.
    pub max_attempts: u32,
    /// Upper bound (exclusive) of the uniform random delay between attempts.
    pub max_backoff: Duration,
    pub existing_run: ExistingRunPolicy,
}

impl Default for AllocationPolicy {
    fn default() -> Self {
        Self::from(AllocationSettings::default())
    }
}

impl From<AllocationSettings> for AllocationPolicy {
    fn from(settings: AllocationSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            max_backoff: settings.max_backoff(),
            existing_run: ExistingRunPolicy::default(),
        }
    }
}

impl AllocationPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    pub fn with_existing_run(mut self, existing_run: ExistingRunPolicy) -> Self {
        self.existing_run = existing_run;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunDirectoryAllocator {
    policy: AllocationPolicy,
}

impl RunDirectoryAllocator {
    pub fn new(policy: AllocationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &AllocationPolicy {
        &self.policy
    }

    /// Claim a run directory under `root`, creating `root` if needed.
    pub fn allocate(&self, root: &Path, run_id: Option<u64>) -> Result<AllocatedRun> {
        fs::create_dir_all(root).map_err(|source| ExplogError::RootUnavailable {
            path: root.to_path_buf(),
            source,
        })?;

        let run = match run_id {
            Some(id) => self.claim_explicit(root, id)?,
            None => self.claim_next(root)?,
        };
        info!(run_id = run.run_id, path = %run.path.display(), "Allocated run directory");
        Ok(run)
    }

    fn claim_explicit(&self, root: &Path, run_id: u64) -> Result<AllocatedRun> {
        let path = run_path(root, run_id);
        match fs::create_dir(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => match self.policy.existing_run {
                ExistingRunPolicy::Fail => return Err(ExplogError::RunDirExists(path)),
                ExistingRunPolicy::Reuse if path.is_dir() => {
                    info!(run_id, "Reusing existing run directory");
                }
                ExistingRunPolicy::Reuse => return Err(ExplogError::RunDirExists(path)),
            },
            Err(e) => return Err(e.into()),
        }
        Ok(AllocatedRun { run_id, path })
    }

    fn claim_next(&self, root: &Path) -> Result<AllocatedRun> {
        let attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=attempts {
            let max = max_existing_run_id(root)?;
            let run_id = max.checked_add(1).ok_or_else(|| ExplogError::RunIdOverflow {
                root: root.to_path_buf(),
                max,
            })?;
            let path = run_path(root, run_id);
            match fs::create_dir(&path) {
                Ok(()) => return Ok(AllocatedRun { run_id, path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(run_id, attempt, "Run directory taken concurrently, retrying");
                    if attempt < attempts {
                        self.backoff();
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        error!(root = %root.display(), attempts, "Run directory allocation exhausted");
        Err(ExplogError::AllocationExhausted {
            root: root.to_path_buf(),
            attempts,
        })
    }

    fn backoff(&self) {
        let delay = self.backoff_delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }

    /// Uniform in `[0, max_backoff)`; zero when no backoff is configured.
    fn backoff_delay(&self) -> Duration {
        if self.policy.max_backoff.is_zero() {
            return Duration::ZERO;
        }
        rand::thread_rng().gen_range(Duration::ZERO..self.policy.max_backoff)
    }
}

pub fn run_path(root: &Path, run_id: u64) -> PathBuf {
    root.join(run_id.to_string())
}

/// Parse a directory name as a run id: ASCII digits only, no sign, no padding
/// rules beyond what `u64` accepts.
pub fn parse_run_id(name: &str) -> Option<u64> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// Largest numeric run directory under `root`, or 0 when there is none.
pub fn max_existing_run_id(root: &Path) -> Result<u64> {
    let mut max = 0;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let Some(id) = entry.file_name().to_str().and_then(parse_run_id) else {
            continue;
        };
        // Follows symlinks, like `Path::is_dir`.
        if entry.path().is_dir() {
            max = max.max(id);
        }
    }
    Ok(max)
}

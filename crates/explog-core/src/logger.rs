//! Per-run logger: owns one allocated run directory for the lifetime of a run.
//!
//! `RunLogger::new()` validates the config, claims a run directory, stamps
//! host metadata into the config and writes `metadata.yaml`. Afterwards the
//! run records metrics as JSON lines and artifacts into category
//! subdirectories. All writes are synchronous; errors go straight back to the
//! caller.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::allocator::{AllocationPolicy, RunDirectoryAllocator};
use crate::artifacts::{Artifact, ArtifactCategory};
use crate::config::RunConfig;
use crate::error::Result;
use crate::metrics::{self, Metrics};
use crate::sink::OutputSink;
use crate::storage;

pub struct RunLogger {
    config: RunConfig,
    root: PathBuf,
    run_id: u64,
    dir: PathBuf,
    sink: Option<OutputSink>,
}

impl RunLogger {
    /// Start a run using the allocation settings from `config.logs.allocation`.
    pub fn new(config: RunConfig) -> Result<Self> {
        let policy = config
            .logs
            .allocation
            .map(AllocationPolicy::from)
            .unwrap_or_default();
        Self::with_allocator(config, &RunDirectoryAllocator::new(policy))
    }

    pub fn with_allocator(mut config: RunConfig, allocator: &RunDirectoryAllocator) -> Result<Self> {
        config.validate()?;
        let root = config.root_dir()?;
        let run = allocator.allocate(&root, config.logs.log_id)?;

        let mut logger = Self {
            config,
            root,
            run_id: run.run_id,
            dir: run.path,
            sink: None,
        };
        logger.initialize();
        if logger.config.logs.log_to_file {
            logger.sink = Some(OutputSink::create(&logger.dir.join(storage::LOG_FILE))?);
        }
        logger.persist_config()?;

        info!(
            run_id = logger.run_id,
            pid = logger.config.system.process_id,
            hostname = logger.config.system.hostname.as_deref().unwrap_or(""),
            path = %logger.dir.display(),
            "Run started"
        );
        debug!(config = ?logger.config, "Run configuration");
        Ok(logger)
    }

    /// Stamp host metadata and the allocated run into the config.
    fn initialize(&mut self) {
        let now = Local::now();
        let system = &mut self.config.system;
        system.hostname = Some(gethostname::gethostname().to_string_lossy().into_owned());
        system.process_id = Some(std::process::id());
        system.date = Some(now.format("%d/%m/%Y").to_string());
        system.time = Some(now.format("%H:%M:%S").to_string());

        let logs = &mut self.config.logs;
        logs.log_id = Some(self.run_id);
        logs.path = Some(self.dir.clone());
    }

    /// Write the full configuration to `metadata.yaml`, replacing any earlier
    /// snapshot.
    pub fn persist_config(&self) -> Result<()> {
        storage::save_run_config(&self.dir, &self.config)
    }

    /// Append one record to `<tag>metrics.json`. `step` is not stored; callers
    /// that need it put it in `values`.
    ///
    /// Non-finite floats are written as `null`; use [`Self::log_scalars`] to
    /// have them rejected.
    pub fn log_metrics<T: Serialize + ?Sized>(&self, values: &T, tag: &str, step: Option<u64>) -> Result<()> {
        let path = storage::metrics_path(&self.dir, tag);
        storage::append_json_line(&path, values)?;
        debug!(run_id = self.run_id, tag, step, "Logged metrics");
        Ok(())
    }

    /// Like [`Self::log_metrics`], but fails with `InvalidMetrics` on NaN or
    /// infinite values before anything is written.
    pub fn log_scalars(&self, values: &Metrics, tag: &str, step: Option<u64>) -> Result<()> {
        metrics::check_finite(values)?;
        self.log_metrics(values, tag, step)
    }

    /// Write `artifact` to `<category>/<tag>_<step>.<ext>` and return its path.
    ///
    /// For checkpoints, `copy_tag` also writes a byte-identical copy to
    /// `<category>/<copy_tag>_<step>.<ext>`. The two writes are not atomic
    /// with respect to each other.
    pub fn log_artifact(
        &self,
        artifact: &dyn Artifact,
        step: u64,
        tag: &str,
        copy_tag: Option<&str>,
    ) -> Result<PathBuf> {
        let category = artifact.category();
        let subdir = self.dir.join(category.dir_name());
        storage::ensure_dir(&subdir)?;

        let path = subdir.join(category.file_name(tag, step));
        let mut out = BufWriter::new(fs::File::create(&path)?);
        artifact.write_to(&mut out)?;
        out.flush()?;
        drop(out);
        info!(run_id = self.run_id, %category, path = %path.display(), "Saved artifact");

        match copy_tag {
            Some(copy_tag) if category == ArtifactCategory::Checkpoints => {
                let copy_path = subdir.join(category.file_name(copy_tag, step));
                // fs::copy onto the source truncates it before reading.
                if copy_path == path {
                    warn!(copy_tag, "Copy tag equals the checkpoint tag; skipping copy");
                } else {
                    fs::copy(&path, &copy_path)?;
                    debug!(path = %copy_path.display(), "Copied checkpoint");
                }
            }
            Some(copy_tag) => {
                warn!(%category, copy_tag, "Copies are only made for checkpoints; ignoring copy tag");
            }
            None => {}
        }
        Ok(path)
    }

    /// Where an artifact of the named category would be written.
    pub fn artifact_path(&self, category: &str, tag: &str, step: u64) -> Result<PathBuf> {
        let category: ArtifactCategory = category.parse()?;
        Ok(self
            .dir
            .join(category.dir_name())
            .join(category.file_name(tag, step)))
    }

    /// The run-local log file, present when `logs.log_to_file` is set.
    pub fn output_sink(&self) -> Option<&OutputSink> {
        self.sink.as_ref()
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Experiment root shared by all runs with the same `log_dir/log_name`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }
}

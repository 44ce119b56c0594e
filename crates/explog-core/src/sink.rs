//! Run-local output sink.
//!
//! Instead of swapping the process's stdout/stderr, a run that asks for
//! `logs.log_to_file` gets an [`OutputSink`] over `<run>/log.txt`. The host
//! decides what to route into it: write to it directly, hand it to a
//! `tracing` subscriber, or wrap it in a non-blocking writer.

use std::fs::File;
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::error::Result;

/// Cloneable, line-buffered handle to a run's log file.
#[derive(Debug, Clone)]
pub struct OutputSink {
    path: PathBuf,
    file: Arc<Mutex<LineWriter<File>>>,
}

impl OutputSink {
    /// Create (or truncate) the log file.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(Mutex::new(LineWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A `tracing` subscriber writing plain-text events into this sink.
    /// Filtering follows `RUST_LOG`, defaulting to `info`.
    ///
    /// Install it with `tracing::subscriber::set_global_default` for the rest
    /// of the process, or scope it with `tracing::subscriber::with_default`.
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        self.subscriber_with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
    }

    pub fn subscriber_with_filter(&self, filter: EnvFilter) -> impl tracing::Subscriber + Send + Sync + 'static {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(self.clone())
            .with_ansi(false)
            .finish()
    }

    /// Offload writes to a background worker. Keep the guard alive until the
    /// run ends; dropping it flushes pending lines.
    pub fn non_blocking(&self) -> (NonBlocking, WorkerGuard) {
        tracing_appender::non_blocking(self.clone())
    }
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file
            .lock()
            .map_err(|_| io::Error::other("run log file lock poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file
            .lock()
            .map_err(|_| io::Error::other("run log file lock poisoned"))?
            .flush()
    }
}

impl<'a> MakeWriter<'a> for OutputSink {
    type Writer = OutputSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

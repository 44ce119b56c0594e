//! Storage layer: YAML snapshots, JSON-lines metric streams, run directories.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::allocator::parse_run_id;
use crate::config::RunConfig;
use crate::error::{ExplogError, Result};

pub const CONFIG_FILE: &str = "metadata.yaml";
pub const LOG_FILE: &str = "log.txt";

// ─── Directory helpers ────────────────────────────────────────────────────────

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Run ids present under `root`, ascending. Non-numeric entries are skipped.
pub fn list_runs(root: &Path) -> Result<Vec<u64>> {
    if !root.exists() {
        return Ok(vec![]);
    }
    let mut ids = vec![];
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(id) = entry.file_name().to_str().and_then(parse_run_id) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

// ─── YAML config I/O ─────────────────────────────────────────────────────────

pub fn save_yaml<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let content = serde_yaml::to_string(data)?;
    fs::write(path, content)?;
    Ok(())
}

pub fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

pub fn save_run_config(run_dir: &Path, config: &RunConfig) -> Result<()> {
    save_yaml(&run_dir.join(CONFIG_FILE), config)
}

pub fn load_run_config(run_dir: &Path) -> Result<RunConfig> {
    load_yaml(&run_dir.join(CONFIG_FILE))
}

// ─── JSON-lines metrics I/O ──────────────────────────────────────────────────

/// `<tag>metrics.json`; the empty tag is the default stream.
pub fn metrics_path(run_dir: &Path, tag: &str) -> PathBuf {
    run_dir.join(format!("{tag}metrics.json"))
}

/// Append one JSON object as a single line. The file is opened per call so
/// every record reaches the OS before the call returns. NaN and infinities
/// become `null`, as `serde_json` has no encoding for them.
pub fn append_json_line<T: Serialize + ?Sized>(path: &Path, record: &T) -> Result<()> {
    let value = serde_json::to_value(record)?;
    if !value.is_object() {
        return Err(ExplogError::InvalidMetrics(json_kind(&value).to_string()));
    }
    let mut line = serde_json::to_string(&value)?;
    line.push('\n');
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Read every record of a metric stream, in write order.
pub fn read_metrics(path: &Path) -> Result<Vec<serde_json::Value>> {
    if !path.exists() {
        return Ok(vec![]);
    }
    let reader = BufReader::new(fs::File::open(path)?);
    let mut rows = vec![];
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(serde_json::from_str(&line)?);
    }
    Ok(rows)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

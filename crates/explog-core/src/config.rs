//! Typed run configuration.
//!
//! A run configuration has two named groups, `logs` and `system`, plus any
//! number of experiment-specific keys. Unknown keys are kept verbatim at every
//! level so the persisted snapshot is the caller's document plus the fields
//! the logger stamps in.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExplogError, Result};

/// Full configuration of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default)]
    pub system: SystemConfig,
    /// Experiment parameters (model, optimizer, seeds, ...).
    #[serde(flatten)]
    pub params: BTreeMap<String, serde_yaml::Value>,
}

/// The `logs` group: where and how the run is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// Parent of every experiment root.
    pub log_dir: PathBuf,
    /// Experiment name; the run root is `log_dir/log_name`.
    pub log_name: String,
    /// Explicit run id. Filled in with the allocated id once the run starts.
    pub log_id: Option<u64>,
    /// Route run output to `log.txt` inside the run directory.
    pub log_to_file: bool,
    /// Resolved run directory, stamped at start.
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocation: Option<AllocationSettings>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./logs"),
            log_name: "default".to_string(),
            log_id: None,
            log_to_file: false,
            path: None,
            allocation: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Retry settings for run id allocation, as they appear in YAML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationSettings {
    pub max_attempts: u32,
    pub max_backoff_ms: u64,
}

impl Default for AllocationSettings {
    fn default() -> Self {
        Self {
            max_attempts: 1000,
            max_backoff_ms: 1000,
        }
    }
}

impl AllocationSettings {
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// The `system` group: host metadata stamped at run start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub hostname: Option<String>,
    pub process_id: Option<u32>,
    /// `dd/mm/YYYY`, local time.
    pub date: Option<String>,
    /// `HH:MM:SS`, local time.
    pub time: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl RunConfig {
    pub fn new(log_dir: impl Into<PathBuf>, log_name: impl Into<String>) -> Self {
        Self {
            logs: LogsConfig {
                log_dir: log_dir.into(),
                log_name: log_name.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_log_id(mut self, log_id: u64) -> Self {
        self.logs.log_id = Some(log_id);
        self
    }

    pub fn with_log_to_file(mut self, enabled: bool) -> Self {
        self.logs.log_to_file = enabled;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_yaml::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Reject configurations that cannot name a run root.
    pub fn validate(&self) -> Result<()> {
        if self.logs.log_dir.as_os_str().is_empty() {
            return Err(ExplogError::InvalidConfig("logs.log_dir is empty".into()));
        }
        let name = self.logs.log_name.as_str();
        if name.is_empty() {
            return Err(ExplogError::InvalidConfig("logs.log_name is empty".into()));
        }
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(ExplogError::InvalidConfig(format!(
                "logs.log_name must be a single path component, got {name:?}"
            )));
        }
        if let Some(allocation) = &self.logs.allocation {
            if allocation.max_attempts == 0 {
                return Err(ExplogError::InvalidConfig(
                    "logs.allocation.max_attempts must be at least 1".into(),
                ));
            }
        }
        Ok(())
    }

    /// Root directory holding every run of this experiment, made absolute
    /// against the current working directory.
    pub fn root_dir(&self) -> Result<PathBuf> {
        let root = self.logs.log_dir.join(&self.logs.log_name);
        Ok(std::path::absolute(root)?)
    }
}

//! Run configuration.
//!
//! Values come from an optional JSON file, then command-line overrides.
//! The worker count is the one operator input that must never abort a run:
//! anything unusable falls back to the default and is reported.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Download workers used when the operator gives no usable number.
pub const DEFAULT_WORKERS: usize = 15;

/// Prefix of every backup folder name.
pub const DEFAULT_PREFIX: &str = "backup";

/// Why a worker count input was replaced by the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCountWarning {
    /// Parsed, but zero or negative
    NotPositive(i64),
    /// Not an integer at all
    NotNumeric(String),
}

impl fmt::Display for WorkerCountWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPositive(n) => write!(f, "invalid number {}, using {} workers", n, DEFAULT_WORKERS),
            Self::NotNumeric(s) => write!(f, "non-numeric input '{}', using {} workers", s, DEFAULT_WORKERS),
        }
    }
}

/// Interpret an operator-typed worker count.
///
/// Empty input silently selects the default.
pub fn parse_worker_count(input: &str) -> (usize, Option<WorkerCountWarning>) {
    let input = input.trim();
    if input.is_empty() {
        return (DEFAULT_WORKERS, None);
    }
    match input.parse::<i64>() {
        Ok(n) if n > 0 => (usize::try_from(n).unwrap_or(DEFAULT_WORKERS), None),
        Ok(n) => (DEFAULT_WORKERS, Some(WorkerCountWarning::NotPositive(n))),
        Err(_) => (DEFAULT_WORKERS, Some(WorkerCountWarning::NotNumeric(input.to_string()))),
    }
}

/// Settings for one backup run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Directory in which the timestamped backup folder is created
    pub output_dir: PathBuf,
    /// Backup folder name prefix
    pub prefix: String,
    /// Download worker pool size
    pub workers: usize,
    /// Where stored credentials live
    pub vault_dir: PathBuf,
}

impl Default for BackupConfig {
    fn default() -> Self {
        let base = default_base_dir();
        BackupConfig {
            output_dir: base.clone(),
            prefix: DEFAULT_PREFIX.to_string(),
            workers: DEFAULT_WORKERS,
            vault_dir: base,
        }
    }
}

impl BackupConfig {
    /// Load a JSON config file. Missing keys keep their defaults.
    ///
    /// `workers` is read as loosely as an operator answer: a number or a
    /// string, with unusable values replaced by the default and reported.
    pub fn from_file(path: &Path) -> Result<(Self, Option<WorkerCountWarning>), ConfigError> {
        let parse_error = |reason: String| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        };
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut value: Value = serde_json::from_str(&text).map_err(|e| parse_error(e.to_string()))?;
        let workers = value.as_object_mut().and_then(|map| map.remove("workers"));
        let mut config: BackupConfig = serde_json::from_value(value).map_err(|e| parse_error(e.to_string()))?;

        let (count, warning) = match workers {
            None | Some(Value::Null) => (DEFAULT_WORKERS, None),
            Some(Value::Number(n)) => parse_worker_count(&n.to_string()),
            Some(Value::String(s)) => parse_worker_count(&s),
            Some(other) => (DEFAULT_WORKERS, Some(WorkerCountWarning::NotNumeric(other.to_string()))),
        };
        config.workers = count;
        Ok((config, warning))
    }
}

/// Directory of the running executable, or the current directory.
fn default_base_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

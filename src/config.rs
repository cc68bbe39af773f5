use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Default wall-clock budget per execution, in seconds
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Default ceiling on simultaneously running executions
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Default capacity of the execution history ring buffer
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Execution defaults supplied by the settings layer.
///
/// The concrete settings UI lives in the embedding application; this core only
/// consumes the resolved values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Where history, active-pid tracking, and logs live. Defaults to
    /// `~/.taskdock` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}
fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}
fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            history_limit: DEFAULT_HISTORY_LIMIT,
            data_dir: None,
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Resolved data directory (`~/.taskdock` unless overridden).
    pub fn data_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.data_dir {
            return dir.clone();
        }
        dirs::home_dir()
            .map(|h| h.join(".taskdock"))
            .unwrap_or_else(|| std::env::temp_dir().join("taskdock"))
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir().join("execution_history.json")
    }

    pub fn active_pids_path(&self) -> PathBuf {
        self.data_dir().join("active-pids.json")
    }

    pub fn main_pid_path(&self) -> PathBuf {
        self.data_dir().join("taskdock.pid")
    }
}

#[instrument(name = "load_config")]
pub fn load_config() -> ExecutionConfig {
    let config_path = PathBuf::from(shellexpand::tilde("~/.taskdock/config.json").as_ref());

    if !config_path.exists() {
        info!(path = %config_path.display(), "Config file not found, using defaults");
        return ExecutionConfig::default();
    }

    let contents = match std::fs::read_to_string(&config_path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!(error = %e, path = %config_path.display(), "Failed to read config, using defaults");
            return ExecutionConfig::default();
        }
    };

    match serde_json::from_str::<ExecutionConfig>(&contents) {
        Ok(config) => {
            info!(path = %config_path.display(), "Successfully loaded config");
            config
        }
        Err(e) => {
            warn!(error = %e, "Failed to parse config JSON, using defaults");
            ExecutionConfig::default()
        }
    }
}

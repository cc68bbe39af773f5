//! Execution status and record value objects.
//!
//! An [`ExecutionRecord`] captures a single launch attempt of a script or
//! program. It is mutable only while the execution is active; once it reaches
//! a terminal status the manager archives it into history and never touches
//! it again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Lifecycle state of one execution attempt.
///
/// `Idle` is the conceptual pre-launch state shown by status indicators; the
/// manager itself only ever stores records that are `Running` or terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Idle,
    Running,
    Success,
    Error,
    Timeout,
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal statuses end the record's lifecycle; no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success
                | ExecutionStatus::Error
                | ExecutionStatus::Timeout
                | ExecutionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Idle => "idle",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution attempt of a launchable item.
///
/// `execution_id` is minted per launch and never reused. `script_id` is the
/// stable identity of the launchable (by convention its path) and correlates
/// repeated launches over time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub script_id: String,
    pub source_path: PathBuf,
    /// Full command line used for the launch (argv shape).
    pub command: Vec<String>,
    pub start_time: DateTime<Utc>,
    /// Absent while the execution is still running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Free-form context (elevation, launch strategy, error summaries).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl ExecutionRecord {
    /// Create a freshly started record with a new unique execution id.
    pub fn started(script_id: impl Into<String>, source_path: &Path, command: Vec<String>) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            script_id: script_id.into(),
            source_path: source_path.to_path_buf(),
            command,
            start_time: Utc::now(),
            end_time: None,
            status: ExecutionStatus::Running,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            working_dir: None,
            metadata: HashMap::new(),
        }
    }

    /// Wall-clock duration in seconds. Only meaningful once the record is
    /// terminal; returns None while still running.
    pub fn duration_seconds(&self) -> Option<f64> {
        let end = self.end_time?;
        let micros = end.signed_duration_since(self.start_time).num_microseconds()?;
        Some(micros as f64 / 1_000_000.0)
    }

    pub fn append_stdout(&mut self, chunk: &str) {
        self.stdout.push_str(chunk);
    }

    pub fn append_stderr(&mut self, chunk: &str) {
        self.stderr.push_str(chunk);
    }

    /// Stamp the terminal transition. The caller is responsible for archiving
    /// the record afterwards; this only sets status and end time.
    pub fn finish(&mut self, status: ExecutionStatus, exit_code: Option<i32>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.exit_code = exit_code;
        self.end_time = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;

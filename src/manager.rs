//! Central execution status tracking.
//!
//! [`ExecutionStatusManager`] owns the set of active executions, the bounded
//! history ring, per-script performance samples, and the status-callback
//! registry. It is the single source of truth for "what ran, what is running,
//! and how did it go".
//!
//! Locking discipline: all state lives behind one `parking_lot::Mutex`, and
//! callbacks are always invoked *after* the lock is released, from a snapshot.
//! A callback may therefore call back into the manager without deadlocking.

use crate::error::{Result, ResultExt};
use crate::launcher::ProcessOutcome;
use crate::status::{ExecutionRecord, ExecutionStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Observer invoked on every status transition of a watched script.
///
/// Callbacks run on whatever thread drove the transition, never while the
/// manager lock is held. UI layers are responsible for marshalling to their
/// own thread.
pub type StatusCallback = Arc<dyn Fn(ExecutionStatus, &ExecutionRecord) + Send + Sync>;

/// Token returned by callback registration, used to unregister later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// Per-script aggregate over the terminal executions still in history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub total_executions: usize,
    /// Percentage of executions that ended in `Success` (0.0 - 100.0)
    pub success_rate: f64,
    /// Durations aggregate over all terminal executions, failures included
    pub avg_duration: f64,
    pub min_duration: f64,
    pub max_duration: f64,
    pub last_execution: DateTime<Utc>,
}

/// Whole-history aggregate across every script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateStats {
    pub total_executions: usize,
    pub success_rate: f64,
    pub average_duration: f64,
    /// Top scripts by execution count, descending, at most ten entries
    pub most_executed: Vec<(String, usize)>,
    pub active_count: usize,
}

/// One terminal execution distilled for stats.
///
/// Samples are appended on terminal transition and evicted in lockstep with
/// the history ring, so per-script stats always describe exactly the records
/// a history query can still see.
struct PerfSample {
    duration: f64,
    status: ExecutionStatus,
    timestamp: DateTime<Utc>,
}

struct ManagerState {
    active: HashMap<String, ExecutionRecord>,
    history: VecDeque<ExecutionRecord>,
    callbacks: HashMap<String, Vec<(CallbackId, StatusCallback)>>,
    samples: HashMap<String, VecDeque<PerfSample>>,
    next_callback_id: u64,
}

pub struct ExecutionStatusManager {
    state: Mutex<ManagerState>,
    history_limit: usize,
}

impl ExecutionStatusManager {
    pub fn new(history_limit: usize) -> Self {
        ExecutionStatusManager {
            state: Mutex::new(ManagerState {
                active: HashMap::new(),
                history: VecDeque::new(),
                callbacks: HashMap::new(),
                samples: HashMap::new(),
                next_callback_id: 0,
            }),
            history_limit: history_limit.max(1),
        }
    }

    /// Begin tracking a new execution. Returns the minted execution id and
    /// notifies the script's callbacks with `Running`.
    pub fn start_execution(
        &self,
        script_id: impl Into<String>,
        source_path: &Path,
        command: Vec<String>,
    ) -> String {
        self.insert_started(ExecutionRecord::started(script_id, source_path, command))
    }

    /// Like [`start_execution`](Self::start_execution) but with a caller-built
    /// record, so launch metadata and working dir survive into tracking.
    pub fn insert_started(&self, record: ExecutionRecord) -> String {
        debug_assert_eq!(record.status, ExecutionStatus::Running);
        let execution_id = record.execution_id.clone();
        let snapshot = record.clone();

        let callbacks = {
            let mut state = self.state.lock();
            state
                .active
                .insert(execution_id.clone(), record);
            callbacks_for(&state, &snapshot.script_id)
        };

        info!(
            execution_id = %execution_id,
            script_id = %snapshot.script_id,
            "Execution started"
        );
        notify(&callbacks, ExecutionStatus::Running, &snapshot);
        execution_id
    }

    /// Update an active execution's status and append any new output.
    ///
    /// Unknown execution ids are ignored with a warning; a terminal status
    /// archives the record into history and stops tracking it as active.
    #[instrument(skip(self, stdout, stderr), fields(execution_id = %execution_id))]
    pub fn update_execution_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        stdout: Option<&str>,
        stderr: Option<&str>,
    ) {
        self.apply_update(execution_id, status, |record| {
            if let Some(chunk) = stdout {
                record.append_stdout(chunk);
            }
            if let Some(chunk) = stderr {
                record.append_stderr(chunk);
            }
            if status.is_terminal() {
                record.finish(status, record.exit_code);
            } else {
                record.status = status;
            }
        });
    }

    /// Terminal update from a finished process: installs the captured output
    /// and exit code, then archives the record.
    pub fn complete_execution(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        outcome: &ProcessOutcome,
    ) {
        debug_assert!(status.is_terminal());
        self.apply_update(execution_id, status, |record| {
            record.append_stdout(&outcome.stdout);
            record.append_stderr(&outcome.stderr);
            record.finish(status, outcome.exit_code);
        });
    }

    fn apply_update<F>(&self, execution_id: &str, status: ExecutionStatus, mutate: F)
    where
        F: FnOnce(&mut ExecutionRecord),
    {
        let (callbacks, snapshot) = {
            let mut state = self.state.lock();
            let Some(record) = state.active.get_mut(execution_id) else {
                warn!(execution_id = %execution_id, "Status update for unknown execution id, ignoring");
                return;
            };
            mutate(record);
            let snapshot = record.clone();

            if status.is_terminal() {
                let record = state
                    .active
                    .remove(execution_id)
                    .unwrap_or_else(|| snapshot.clone());
                archive(&mut state, record, self.history_limit);
            }

            (callbacks_for(&state, &snapshot.script_id), snapshot)
        };

        if status.is_terminal() {
            info!(
                execution_id = %execution_id,
                status = %status,
                duration = ?snapshot.duration_seconds(),
                exit_code = ?snapshot.exit_code,
                "Execution finished"
            );
        }
        notify(&callbacks, status, &snapshot);
    }

    /// Register an observer for one script's status transitions.
    pub fn register_status_callback(
        &self,
        script_id: impl Into<String>,
        callback: StatusCallback,
    ) -> CallbackId {
        let mut state = self.state.lock();
        let id = CallbackId(state.next_callback_id);
        state.next_callback_id += 1;
        state
            .callbacks
            .entry(script_id.into())
            .or_default()
            .push((id, callback));
        id
    }

    /// Remove a previously registered callback. Returns false if it was
    /// already gone.
    pub fn unregister_status_callback(&self, script_id: &str, id: CallbackId) -> bool {
        let mut state = self.state.lock();
        let Some(list) = state.callbacks.get_mut(script_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|(cb_id, _)| *cb_id != id);
        let removed = list.len() < before;
        if list.is_empty() {
            state.callbacks.remove(script_id);
        }
        removed
    }

    /// History entries, most recent first, optionally filtered to one source
    /// path. `limit` caps the returned entries, not the scan.
    pub fn get_execution_history(&self, path: Option<&Path>, limit: usize) -> Vec<ExecutionRecord> {
        let state = self.state.lock();
        state
            .history
            .iter()
            .rev()
            .filter(|r| path.map_or(true, |p| r.source_path == p))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Look up a record by execution id, active or archived.
    pub fn get_record(&self, execution_id: &str) -> Option<ExecutionRecord> {
        let state = self.state.lock();
        state
            .active
            .get(execution_id)
            .or_else(|| {
                state
                    .history
                    .iter()
                    .rev()
                    .find(|r| r.execution_id == execution_id)
            })
            .cloned()
    }

    /// Terminal status of the most recent archived run of a path, if any.
    pub fn last_status_for(&self, path: &Path) -> Option<ExecutionStatus> {
        let state = self.state.lock();
        state
            .history
            .iter()
            .rev()
            .find(|r| r.source_path == path)
            .map(|r| r.status)
    }

    /// Per-script performance aggregate. None when the script has no terminal
    /// executions left in history.
    pub fn get_performance_stats(&self, script_id: &str) -> Option<PerformanceStats> {
        let state = self.state.lock();
        let samples = state.samples.get(script_id)?;
        if samples.is_empty() {
            return None;
        }

        let total = samples.len();
        let successes = samples
            .iter()
            .filter(|s| s.status == ExecutionStatus::Success)
            .count();
        let durations: Vec<f64> = samples.iter().map(|s| s.duration).collect();
        let sum: f64 = durations.iter().sum();
        let last = samples.back()?;

        Some(PerformanceStats {
            total_executions: total,
            success_rate: successes as f64 / total as f64 * 100.0,
            avg_duration: sum / total as f64,
            min_duration: durations.iter().copied().fold(f64::INFINITY, f64::min),
            max_duration: durations.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            last_execution: last.timestamp,
        })
    }

    /// Whole-history aggregate across every script.
    pub fn get_statistics(&self) -> AggregateStats {
        let state = self.state.lock();
        let total = state.history.len();
        if total == 0 {
            return AggregateStats {
                total_executions: 0,
                success_rate: 0.0,
                average_duration: 0.0,
                most_executed: Vec::new(),
                active_count: state.active.len(),
            };
        }

        let successful = state
            .history
            .iter()
            .filter(|r| r.status == ExecutionStatus::Success)
            .count();
        let durations: Vec<f64> = state
            .history
            .iter()
            .filter_map(|r| r.duration_seconds())
            .filter(|d| *d > 0.0)
            .collect();
        let average_duration = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for record in &state.history {
            *counts.entry(record.script_id.as_str()).or_default() += 1;
        }
        let mut most_executed: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        most_executed.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        most_executed.truncate(10);

        AggregateStats {
            total_executions: total,
            success_rate: successful as f64 / total as f64 * 100.0,
            average_duration,
            most_executed,
            active_count: state.active.len(),
        }
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn active_executions(&self) -> Vec<ExecutionRecord> {
        self.state.lock().active.values().cloned().collect()
    }

    pub fn clear_history(&self) {
        let mut state = self.state.lock();
        state.history.clear();
        state.samples.clear();
        info!("Execution history cleared");
    }

    /// Persist the archived history as a JSON array.
    pub fn save_history(&self, path: &Path) -> Result<()> {
        let records: Vec<ExecutionRecord> = {
            let state = self.state.lock();
            state.history.iter().cloned().collect()
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&records)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)?;
        debug!(path = %path.display(), count = records.len(), "Execution history saved");
        Ok(())
    }

    /// Load previously saved history, skipping entries that fail to parse.
    ///
    /// Only terminal records are kept; a record persisted mid-run has no
    /// meaningful outcome. Returns the number of records loaded.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn load_history(&self, path: &Path) -> usize {
        if !path.exists() {
            debug!("No history file, starting empty");
            return 0;
        }
        let Some(contents) = std::fs::read_to_string(path).warn_on_err() else {
            return 0;
        };
        let Some(entries) = serde_json::from_str::<Vec<serde_json::Value>>(&contents).warn_on_err()
        else {
            return 0;
        };

        let mut records: Vec<ExecutionRecord> = Vec::with_capacity(entries.len());
        let mut skipped = 0usize;
        for entry in entries {
            match serde_json::from_value::<ExecutionRecord>(entry) {
                Ok(record) if record.is_terminal() => records.push(record),
                Ok(_) => skipped += 1,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed history entry");
                    skipped += 1;
                }
            }
        }

        // Keep only the most recent entries when over capacity
        if records.len() > self.history_limit {
            let excess = records.len() - self.history_limit;
            records.drain(..excess);
        }

        let loaded = records.len();
        let mut state = self.state.lock();
        state.history.clear();
        state.samples.clear();
        for record in records {
            push_sample(&mut state.samples, &record);
            state.history.push_back(record);
        }
        drop(state);

        info!(loaded = loaded, skipped = skipped, "Execution history loaded");
        loaded
    }
}

fn callbacks_for(state: &ManagerState, script_id: &str) -> Vec<StatusCallback> {
    state
        .callbacks
        .get(script_id)
        .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
        .unwrap_or_default()
}

/// Invoke callbacks outside the lock, isolating panics so one broken observer
/// cannot take down the supervising thread or starve the others.
fn notify(callbacks: &[StatusCallback], status: ExecutionStatus, record: &ExecutionRecord) {
    for callback in callbacks {
        let result = catch_unwind(AssertUnwindSafe(|| callback(status, record)));
        if result.is_err() {
            error!(
                script_id = %record.script_id,
                execution_id = %record.execution_id,
                "Status callback panicked"
            );
        }
    }
}

fn archive(state: &mut ManagerState, record: ExecutionRecord, history_limit: usize) {
    push_sample(&mut state.samples, &record);
    state.history.push_back(record);

    while state.history.len() > history_limit {
        if let Some(evicted) = state.history.pop_front() {
            // Keep the sample window aligned with what history still holds
            if let Some(samples) = state.samples.get_mut(&evicted.script_id) {
                samples.pop_front();
                if samples.is_empty() {
                    state.samples.remove(&evicted.script_id);
                }
            }
        }
    }
}

fn push_sample(samples: &mut HashMap<String, VecDeque<PerfSample>>, record: &ExecutionRecord) {
    samples
        .entry(record.script_id.clone())
        .or_default()
        .push_back(PerfSample {
            duration: record.duration_seconds().unwrap_or(0.0),
            status: record.status,
            timestamp: record.end_time.unwrap_or(record.start_time),
        });
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;

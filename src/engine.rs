//! Execution orchestration.
//!
//! [`ExecutionEngine`] drives the full lifecycle of one launch: concurrency
//! admission, strategy resolution, status tracking, supervision, and
//! cancellation. Synchronous failures (missing file, missing interpreter,
//! concurrency ceiling) surface as [`LaunchError`] before an execution id
//! exists; everything after the id is minted reports through the status
//! manager, including compile and spawn failures.

use crate::config::ExecutionConfig;
use crate::error::{LaunchError, Result};
use crate::launcher::{LaunchOptions, LaunchedProcess, ProcessLauncher, ResolvedLaunch};
use crate::manager::ExecutionStatusManager;
use crate::registry::ProcessRegistry;
use crate::status::{ExecutionRecord, ExecutionStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of a successful launch request.
pub enum Execution {
    /// Supervised on a background thread; progress arrives via callbacks.
    Background { execution_id: String },
    /// Ran to completion on the calling thread.
    Foreground { record: ExecutionRecord },
}

impl Execution {
    pub fn execution_id(&self) -> &str {
        match self {
            Execution::Background { execution_id } => execution_id,
            Execution::Foreground { record } => &record.execution_id,
        }
    }
}

struct RunningExecution {
    pid: u32,
    cancel_flag: Arc<AtomicBool>,
}

/// Releases one concurrency slot when dropped, so every exit path out of a
/// launch (including early errors) gives the slot back exactly once.
struct SlotGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ExecutionEngine {
    launcher: ProcessLauncher,
    manager: Arc<ExecutionStatusManager>,
    registry: Arc<ProcessRegistry>,
    config: ExecutionConfig,
    running: Arc<Mutex<HashMap<String, RunningExecution>>>,
    in_flight: Arc<AtomicUsize>,
}

impl ExecutionEngine {
    pub fn new(
        launcher: ProcessLauncher,
        manager: Arc<ExecutionStatusManager>,
        registry: Arc<ProcessRegistry>,
        config: ExecutionConfig,
    ) -> Self {
        ExecutionEngine {
            launcher,
            manager,
            registry,
            config,
            running: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn manager(&self) -> &Arc<ExecutionStatusManager> {
        &self.manager
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn launcher_mut(&mut self) -> &mut ProcessLauncher {
        &mut self.launcher
    }

    /// Launch and supervise on a background thread. Returns the execution id
    /// as soon as tracking starts.
    pub fn execute_background(&self, path: &Path, options: &LaunchOptions) -> Result<String> {
        match self.execute_file(path, options, true)? {
            Execution::Background { execution_id } => Ok(execution_id),
            Execution::Foreground { record } => Ok(record.execution_id),
        }
    }

    /// Launch and block until the execution reaches a terminal status.
    pub fn execute_foreground(&self, path: &Path, options: &LaunchOptions) -> Result<ExecutionRecord> {
        match self.execute_file(path, options, false)? {
            Execution::Foreground { record } => Ok(record),
            Execution::Background { execution_id } => {
                // Unreachable for background=false, but degrade gracefully
                self.manager
                    .get_record(&execution_id)
                    .ok_or_else(|| LaunchError::Io(std::io::Error::other("execution record lost")))
            }
        }
    }

    #[instrument(skip(self, options), fields(path = %path.display(), background = background))]
    pub fn execute_file(
        &self,
        path: &Path,
        options: &LaunchOptions,
        background: bool,
    ) -> Result<Execution> {
        // Admission first: a rejected launch must not touch history
        let slot = self.reserve_slot()?;

        let resolved = self.launcher.resolve(path, options)?;

        let script_id = path.to_string_lossy().into_owned();
        let mut record = ExecutionRecord::started(script_id.as_str(), path, resolved.command_line());
        record.working_dir = Some(resolved.working_dir.clone());
        record
            .metadata
            .insert("strategy".to_string(), resolved.strategy_label.to_string());
        if resolved.elevated {
            record.metadata.insert("elevated".to_string(), "true".to_string());
        }
        let execution_id = self.manager.insert_started(record);

        let cancel_flag = Arc::new(AtomicBool::new(false));
        match self.launch_tracked(&resolved, &execution_id, &script_id, cancel_flag.clone()) {
            Ok(launched) => {
                if background {
                    self.supervise_detached(launched, execution_id.clone(), cancel_flag, slot)?;
                    Ok(Execution::Background { execution_id })
                } else {
                    self.supervise(launched, &execution_id);
                    drop(slot);
                    let record = self.manager.get_record(&execution_id).ok_or_else(|| {
                        LaunchError::Io(std::io::Error::other("execution record lost"))
                    })?;
                    Ok(Execution::Foreground { record })
                }
            }
            // The id exists, so compile/spawn failures become terminal records
            Err(e) => {
                warn!(execution_id = %execution_id, error = %e, "Launch failed after tracking started");
                let detail = match &e {
                    LaunchError::Compile { stderr, .. } => stderr.clone(),
                    other => other.to_string(),
                };
                self.manager.update_execution_status(
                    &execution_id,
                    ExecutionStatus::Error,
                    None,
                    Some(&detail),
                );
                drop(slot);
                if background {
                    Ok(Execution::Background { execution_id })
                } else {
                    let record = self.manager.get_record(&execution_id).ok_or_else(|| {
                        LaunchError::Io(std::io::Error::other("execution record lost"))
                    })?;
                    Ok(Execution::Foreground { record })
                }
            }
        }
    }

    /// Request cancellation of a running execution.
    ///
    /// Sets the cancel flag (so the outcome reads cancelled, even if the
    /// timeout fires in the same window) and kills the process group. Returns
    /// false when the id is unknown or already finished.
    pub fn cancel_execution(&self, execution_id: &str) -> bool {
        let entry = {
            let running = self.running.lock();
            running
                .get(execution_id)
                .map(|r| (r.pid, r.cancel_flag.clone()))
        };
        match entry {
            Some((pid, cancel_flag)) => {
                info!(execution_id = %execution_id, pid = pid, "Cancelling execution");
                cancel_flag.store(true, Ordering::SeqCst);
                crate::launcher::ProcessHandle::new(pid).kill();
                true
            }
            None => {
                debug!(execution_id = %execution_id, "Cancel requested for unknown or finished execution");
                false
            }
        }
    }

    /// Cancel everything currently running.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<String> = self.running.lock().keys().cloned().collect();
        ids.iter().filter(|id| self.cancel_execution(id)).count()
    }

    /// Executions currently being supervised.
    pub fn running_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn reserve_slot(&self) -> Result<SlotGuard> {
        let limit = self.config.max_concurrent.max(1);
        let reserved = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n >= limit {
                    None
                } else {
                    Some(n + 1)
                }
            });
        match reserved {
            Ok(_) => Ok(SlotGuard {
                in_flight: self.in_flight.clone(),
            }),
            Err(_) => {
                warn!(limit = limit, "Concurrent execution limit reached, rejecting launch");
                Err(LaunchError::ConcurrencyLimit { limit })
            }
        }
    }

    fn launch_tracked(
        &self,
        resolved: &ResolvedLaunch,
        execution_id: &str,
        script_id: &str,
        cancel_flag: Arc<AtomicBool>,
    ) -> Result<LaunchedProcess> {
        self.launcher.compile(resolved)?;
        let launched = self.launcher.spawn(resolved, cancel_flag.clone())?;

        self.registry.register(launched.pid(), script_id);
        self.running.lock().insert(
            execution_id.to_string(),
            RunningExecution {
                pid: launched.pid(),
                cancel_flag,
            },
        );
        Ok(launched)
    }

    fn supervise(&self, launched: LaunchedProcess, execution_id: &str) {
        supervise_impl(
            launched,
            execution_id,
            &self.manager,
            &self.registry,
            &self.running,
            self.config.timeout(),
        );
    }

    fn supervise_detached(
        &self,
        launched: LaunchedProcess,
        execution_id: String,
        cancel_flag: Arc<AtomicBool>,
        slot: SlotGuard,
    ) -> Result<()> {
        let manager = self.manager.clone();
        let registry = self.registry.clone();
        let running = self.running.clone();
        let timeout = self.config.timeout();
        let thread_name = format!("exec-{}", &execution_id[..execution_id.len().min(8)]);
        let cleanup_id = execution_id.clone();

        let spawned = std::thread::Builder::new().name(thread_name).spawn(move || {
            let _slot = slot;
            supervise_impl(launched, &execution_id, &manager, &registry, &running, timeout);
        });

        match spawned {
            Ok(_) => Ok(()),
            Err(e) => {
                // No supervisor thread: kill the child and fail the launch.
                // The closure never ran, so the child's Drop kill fires when
                // the moved LaunchedProcess is dropped with it.
                warn!(error = %e, "Failed to spawn supervisor thread");
                cancel_flag.store(true, Ordering::SeqCst);
                let pid = self.running.lock().remove(&cleanup_id).map(|r| r.pid);
                if let Some(pid) = pid {
                    self.registry.unregister(pid);
                }
                self.manager.update_execution_status(
                    &cleanup_id,
                    ExecutionStatus::Error,
                    None,
                    Some("failed to spawn supervisor thread"),
                );
                Err(LaunchError::Io(e))
            }
        }
    }
}

fn supervise_impl(
    launched: LaunchedProcess,
    execution_id: &str,
    manager: &ExecutionStatusManager,
    registry: &ProcessRegistry,
    running: &Mutex<HashMap<String, RunningExecution>>,
    timeout: std::time::Duration,
) {
    let pid = launched.pid();
    let outcome = launched.wait_with_timeout(timeout);

    let status = if outcome.cancelled {
        ExecutionStatus::Cancelled
    } else if outcome.timed_out {
        ExecutionStatus::Timeout
    } else if outcome.exit_code == Some(0) {
        ExecutionStatus::Success
    } else {
        ExecutionStatus::Error
    };

    manager.complete_execution(execution_id, status, &outcome);
    registry.unregister(pid);
    running.lock().remove(execution_id);
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;

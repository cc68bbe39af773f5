//! Child process registry with crash-safe PID persistence.
//!
//! Tracks every process the engine launches, mirrors the set to disk, and on
//! startup detects processes a previous crashed session left behind. A PID
//! file for the main process supports stale-instance detection.
//!
//! Paths are injected at construction so embedders and tests pick their own
//! data directory; there is no global instance.

use crate::launcher::ProcessHandle;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use sysinfo::{Pid, System};
use tracing::{debug, info, warn};

/// Information about a tracked child process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Process ID (also the process group ID; children are spawned as group
    /// leaders)
    pub pid: u32,
    /// Path of the file being executed
    pub script_path: String,
    pub started_at: DateTime<Utc>,
}

/// Thread-safe registry of launched child processes
#[derive(Debug)]
pub struct ProcessRegistry {
    active: RwLock<HashMap<u32, ProcessInfo>>,
    main_pid_path: PathBuf,
    active_pids_path: PathBuf,
}

impl ProcessRegistry {
    pub fn new(main_pid_path: PathBuf, active_pids_path: PathBuf) -> Self {
        ProcessRegistry {
            active: RwLock::new(HashMap::new()),
            main_pid_path,
            active_pids_path,
        }
    }

    /// Write the main process PID to disk. Called at startup; overwrites any
    /// previous file.
    pub fn write_main_pid(&self) -> std::io::Result<()> {
        let pid = std::process::id();
        if let Some(parent) = self.main_pid_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.main_pid_path, pid.to_string())?;
        debug!(pid = pid, path = %self.main_pid_path.display(), "Main PID written");
        Ok(())
    }

    /// Remove the main PID file on clean shutdown.
    pub fn remove_main_pid(&self) {
        if self.main_pid_path.exists() {
            if let Err(e) = fs::remove_file(&self.main_pid_path) {
                warn!(error = %e, "Failed to remove main PID file");
            }
        }
    }

    pub fn read_main_pid(&self) -> Option<u32> {
        let contents = fs::read_to_string(&self.main_pid_path).ok()?;
        contents.trim().parse().ok()
    }

    /// True when a PID file exists but its process is gone (previous session
    /// crashed).
    pub fn is_main_pid_stale(&self) -> bool {
        match self.read_main_pid() {
            Some(pid) => !is_process_running(pid),
            None => false,
        }
    }

    /// Track a newly spawned child and mirror the active set to disk.
    pub fn register(&self, pid: u32, script_path: &str) {
        let info = ProcessInfo {
            pid,
            script_path: script_path.to_string(),
            started_at: Utc::now(),
        };
        debug!(pid = pid, script = script_path, "Registering child process");
        self.active.write().insert(pid, info);
        if let Err(e) = self.persist() {
            warn!(error = %e, "Failed to persist active PIDs");
        }
    }

    /// Stop tracking a child that exited.
    pub fn unregister(&self, pid: u32) {
        debug!(pid = pid, "Unregistering child process");
        self.active.write().remove(&pid);
        if let Err(e) = self.persist() {
            warn!(error = %e, "Failed to persist active PIDs");
        }
    }

    pub fn active_processes(&self) -> Vec<ProcessInfo> {
        self.active.read().values().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    /// Kill every tracked child process group. Used during shutdown.
    pub fn kill_all(&self) {
        let processes = self.active_processes();
        if processes.is_empty() {
            return;
        }
        info!(count = processes.len(), "Killing all tracked processes");
        for proc in &processes {
            kill_group(proc.pid);
        }
        self.active.write().clear();
        if self.active_pids_path.exists() {
            if let Err(e) = fs::remove_file(&self.active_pids_path) {
                warn!(error = %e, "Failed to remove active PIDs file");
            }
        }
    }

    /// Run orphan cleanup only when the previous session crashed.
    ///
    /// A clean shutdown removes the main PID file, so persisted children are
    /// deliberate survivors (detached background runs) and must be left
    /// alone. Only a stale PID file, meaning the owning process died without
    /// cleaning up, triggers the kill pass. Returns the number of orphans
    /// killed.
    pub fn cleanup_if_crashed(&self) -> usize {
        if !self.is_main_pid_stale() {
            debug!("Previous session exited cleanly, skipping orphan cleanup");
            return 0;
        }
        warn!("Stale main PID file found, cleaning up crashed session");
        self.remove_main_pid();
        self.cleanup_orphans()
    }

    /// Detect and kill processes a previous session left behind.
    ///
    /// Reads the persisted PID file, kills the entries still alive, and
    /// clears the file. Returns the number of orphans killed.
    pub fn cleanup_orphans(&self) -> usize {
        let orphans = self.load_persisted();
        if orphans.is_empty() {
            debug!("No orphaned processes found");
            return 0;
        }

        info!(count = orphans.len(), "Checking potentially orphaned processes");
        let mut killed = 0usize;
        for info in &orphans {
            if is_process_running(info.pid) {
                warn!(
                    pid = info.pid,
                    script = %info.script_path,
                    "Killing orphaned process from previous session"
                );
                kill_group(info.pid);
                killed += 1;
            } else {
                debug!(pid = info.pid, "Orphan already exited");
            }
        }

        if self.active_pids_path.exists() {
            if let Err(e) = fs::remove_file(&self.active_pids_path) {
                warn!(error = %e, "Failed to remove orphan PIDs file");
            }
        }
        if killed > 0 {
            info!(killed = killed, "Orphaned processes cleaned up");
        }
        killed
    }

    fn persist(&self) -> std::io::Result<()> {
        let processes = self.active_processes();
        if let Some(parent) = self.active_pids_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&processes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(&self.active_pids_path, json)
    }

    fn load_persisted(&self) -> Vec<ProcessInfo> {
        if !self.active_pids_path.exists() {
            return Vec::new();
        }
        let contents = match fs::read_to_string(&self.active_pids_path) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to read active PIDs file");
                return Vec::new();
            }
        };
        match serde_json::from_str(&contents) {
            Ok(pids) => pids,
            Err(e) => {
                warn!(error = %e, "Failed to parse active PIDs JSON");
                Vec::new()
            }
        }
    }
}

/// Check whether a PID refers to a live process
pub fn is_process_running(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
    system.process(Pid::from_u32(pid)).is_some()
}

fn kill_group(pid: u32) {
    ProcessHandle::new(pid).kill();
}

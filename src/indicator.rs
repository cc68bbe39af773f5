//! Status indicator state for embedding UIs.
//!
//! Maps execution statuses to the small colored indicator shown next to a
//! launchable item, and keeps one item's indicator in sync with the manager
//! via a registered status callback.
//!
//! Callbacks fire on supervisor threads; [`StatusIndicator`] only updates its
//! internal snapshot under a mutex. Marshalling the repaint onto the UI
//! thread is the embedder's job.

use crate::manager::{CallbackId, ExecutionStatusManager};
use crate::status::{ExecutionRecord, ExecutionStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorColor {
    Gray,
    Blue,
    Green,
    Red,
    Orange,
    Yellow,
}

/// Indicator color for a status.
pub fn color_for(status: ExecutionStatus) -> IndicatorColor {
    match status {
        ExecutionStatus::Idle => IndicatorColor::Gray,
        ExecutionStatus::Running => IndicatorColor::Blue,
        ExecutionStatus::Success => IndicatorColor::Green,
        ExecutionStatus::Error => IndicatorColor::Red,
        ExecutionStatus::Timeout => IndicatorColor::Orange,
        ExecutionStatus::Cancelled => IndicatorColor::Yellow,
    }
}

/// Only the running state animates (pulsing dot).
pub fn is_animated(status: ExecutionStatus) -> bool {
    status == ExecutionStatus::Running
}

/// Hover text summarizing the record's outcome.
pub fn tooltip_for(record: &ExecutionRecord) -> String {
    let name = record
        .source_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| record.script_id.clone());

    match record.status {
        ExecutionStatus::Idle => format!("{name}: ready"),
        ExecutionStatus::Running => format!("{name}: running..."),
        ExecutionStatus::Success => match record.duration_seconds() {
            Some(d) => format!("{name}: completed in {d:.2}s"),
            None => format!("{name}: completed"),
        },
        ExecutionStatus::Error => {
            let detail = record
                .stderr
                .lines()
                .find(|l| !l.trim().is_empty())
                .map(str::to_string)
                .or_else(|| record.exit_code.map(|c| format!("exit code {c}")))
                .unwrap_or_else(|| "failed".to_string());
            format!("{name}: {detail}")
        }
        ExecutionStatus::Timeout => match record.duration_seconds() {
            Some(d) => format!("{name}: timed out after {d:.0}s"),
            None => format!("{name}: timed out"),
        },
        ExecutionStatus::Cancelled => format!("{name}: cancelled"),
    }
}

/// Snapshot of everything a UI needs to draw one indicator.
#[derive(Debug, Clone)]
pub struct IndicatorVisual {
    pub status: ExecutionStatus,
    pub color: IndicatorColor,
    pub animated: bool,
    pub tooltip: String,
}

impl IndicatorVisual {
    fn idle(name: &str) -> Self {
        IndicatorVisual {
            status: ExecutionStatus::Idle,
            color: IndicatorColor::Gray,
            animated: false,
            tooltip: format!("{name}: ready"),
        }
    }

    fn from_record(status: ExecutionStatus, record: &ExecutionRecord) -> Self {
        IndicatorVisual {
            status,
            color: color_for(status),
            animated: is_animated(status),
            tooltip: tooltip_for(record),
        }
    }
}

/// Live indicator for one launchable item.
///
/// Registers a status callback on attach and unregisters it on drop, so a
/// dropped indicator stops consuming transitions immediately.
pub struct StatusIndicator {
    manager: Arc<ExecutionStatusManager>,
    script_id: String,
    callback_id: CallbackId,
    visual: Arc<Mutex<IndicatorVisual>>,
}

impl StatusIndicator {
    pub fn attach(manager: Arc<ExecutionStatusManager>, script_id: impl Into<String>) -> Self {
        let script_id = script_id.into();
        let name = Path::new(&script_id)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| script_id.clone());

        // Seed from the most recent archived run, if any
        let initial = match manager.last_status_for(Path::new(&script_id)) {
            Some(status) => IndicatorVisual {
                status,
                color: color_for(status),
                animated: is_animated(status),
                tooltip: format!("{name}: last run {status}"),
            },
            None => IndicatorVisual::idle(&name),
        };

        let visual = Arc::new(Mutex::new(initial));
        let sink = visual.clone();
        let callback_id = manager.register_status_callback(
            script_id.clone(),
            Arc::new(move |status, record| {
                *sink.lock() = IndicatorVisual::from_record(status, record);
            }),
        );

        StatusIndicator {
            manager,
            script_id,
            callback_id,
            visual,
        }
    }

    pub fn script_id(&self) -> &str {
        &self.script_id
    }

    pub fn visual(&self) -> IndicatorVisual {
        self.visual.lock().clone()
    }

    pub fn status(&self) -> ExecutionStatus {
        self.visual.lock().status
    }

    pub fn color(&self) -> IndicatorColor {
        self.visual.lock().color
    }
}

impl Drop for StatusIndicator {
    fn drop(&mut self) {
        self.manager
            .unregister_status_callback(&self.script_id, self.callback_id);
    }
}

#[cfg(test)]
#[path = "indicator_tests.rs"]
mod tests;

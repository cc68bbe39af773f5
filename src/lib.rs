//! Taskdock - execution and status tracking for a desktop launcher
//!
//! This library launches scripts and programs across many languages, tracks
//! each execution's lifecycle, keeps a bounded history with per-script
//! performance stats, and feeds status-indicator callbacks to embedding UIs.

pub mod config;
pub mod engine;
pub mod error;
pub mod indicator;
pub mod launcher;
pub mod logging;
pub mod manager;
pub mod registry;
pub mod status;

pub use config::{load_config, ExecutionConfig};
pub use engine::{Execution, ExecutionEngine};
pub use error::{LaunchError, Result};
pub use indicator::{IndicatorColor, IndicatorVisual, StatusIndicator};
pub use launcher::{DispatchTable, LaunchOptions, LaunchStrategy, ProcessLauncher};
pub use manager::{AggregateStats, ExecutionStatusManager, PerformanceStats, StatusCallback};
pub use registry::ProcessRegistry;
pub use status::{ExecutionRecord, ExecutionStatus};

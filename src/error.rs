use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, warn};

/// Error severity for UI display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,     // Blue - informational
    Warning,  // Yellow - recoverable
    Error,    // Red - operation failed
    Critical, // Red + modal - requires user action
}

/// Errors surfaced synchronously by `execute_file`/`ProcessLauncher`, before
/// an execution id exists. Failures after launch (runtime errors, timeouts)
/// never appear here; they flow through the status-callback channel instead.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("path is not valid UTF-8: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("interpreter '{program}' is not installed or not on PATH")]
    InterpreterMissing { program: String },

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("compilation failed{}", .exit_code.map(|c| format!(" (exit code {c})")).unwrap_or_default())]
    Compile {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("privilege elevation is not supported on this platform")]
    ElevationUnsupported,

    #[error("privilege elevation failed: {0}")]
    Elevation(String),

    #[error("concurrent execution limit reached ({limit})")]
    ConcurrencyLimit { limit: usize },

    #[error("no handler available to open {}", .0.display())]
    NoOpenHandler(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LaunchError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::FileNotFound(_) => ErrorSeverity::Warning,
            Self::InvalidPath(_) => ErrorSeverity::Warning,
            Self::InterpreterMissing { .. } => ErrorSeverity::Error,
            Self::Spawn { .. } => ErrorSeverity::Error,
            Self::Compile { .. } => ErrorSeverity::Error,
            Self::ElevationUnsupported => ErrorSeverity::Warning,
            Self::Elevation(_) => ErrorSeverity::Error,
            Self::ConcurrencyLimit { .. } => ErrorSeverity::Warning,
            Self::NoOpenHandler(_) => ErrorSeverity::Warning,
            Self::Io(_) => ErrorSeverity::Error,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::FileNotFound(path) => format!("File does not exist: {}", path.display()),
            Self::InterpreterMissing { program } => {
                format!("'{}' is required to run this file but was not found", program)
            }
            Self::Compile { stderr, .. } => {
                let first = stderr.lines().next().unwrap_or("compilation failed");
                format!("Compilation failed: {}", first)
            }
            Self::ConcurrencyLimit { limit } => {
                format!("Too many scripts running (limit {})", limit)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LaunchError>;

/// Extension trait for silent error logging with caller location tracking.
/// Use when the operation is recoverable and the user doesn't need to know.
pub trait ResultExt<T> {
    /// Log error with caller location and return None. Use for recoverable failures.
    fn log_err(self) -> Option<T>;
    /// Log as warning with caller location and return None. Use for expected failures.
    fn warn_on_err(self) -> Option<T>;
}

impl<T, E: std::fmt::Debug> ResultExt<T> for std::result::Result<T, E> {
    #[track_caller]
    fn log_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(err) => {
                let caller = std::panic::Location::caller();
                error!(
                    error = ?err,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation failed"
                );
                None
            }
        }
    }

    #[track_caller]
    fn warn_on_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(err) => {
                let caller = std::panic::Location::caller();
                warn!(
                    error = ?err,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation had warning"
                );
                None
            }
        }
    }
}

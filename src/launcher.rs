//! Process launching and file-type dispatch
//!
//! Maps a file's extension to a [`LaunchStrategy`], resolves the interpreter
//! or toolchain it needs, and produces a running child process. Compiled
//! languages go through a synchronous compile step first; the run step is
//! never attempted when compilation fails.
//!
//! Children are spawned in their own process group so cancellation and
//! timeout enforcement can kill the whole tree, not just the leader.

use crate::error::{LaunchError, Result};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

/// How often the supervising wait loop polls the child for exit
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Minimum window allowed for draining output pipes after the leader exits
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(250);

// Unix-specific process control using libc for correctness and performance
#[cfg(unix)]
mod unix_process {
    use libc::{c_int, pid_t, ESRCH};

    /// Send a signal to a process group (negative PID targets the group)
    pub fn kill_process_group(pgid: u32, signal: c_int) -> std::result::Result<(), &'static str> {
        // Safety: kill() is a simple syscall with no memory safety concerns
        let rc = unsafe { libc::kill(-(pgid as pid_t), signal) };
        if rc == 0 {
            Ok(())
        } else {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            match errno {
                libc::ESRCH => Err("No such process group"),
                libc::EPERM => Err("Permission denied"),
                libc::EINVAL => Err("Invalid signal"),
                _ => Err("Unknown error"),
            }
        }
    }

    /// Check if a process group is still alive.
    ///
    /// Uses signal 0 which doesn't actually send a signal. EPERM means the
    /// group exists but we can't signal it - still counts as alive.
    pub fn process_group_alive(pgid: u32) -> bool {
        // Safety: kill() with signal 0 is safe - it only checks existence
        let rc = unsafe { libc::kill(-(pgid as pid_t), 0) };
        if rc == 0 {
            true
        } else {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            errno != ESRCH
        }
    }

    pub const SIGTERM: c_int = libc::SIGTERM;
    pub const SIGKILL: c_int = libc::SIGKILL;
}

/// Find an executable, checking common locations that GUI apps might miss
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let common_paths = [
        dirs::home_dir().map(|h| h.join(".local/bin")),
        dirs::home_dir().map(|h| h.join("bin")),
        Some(PathBuf::from("/opt/homebrew/bin")),
        Some(PathBuf::from("/usr/local/bin")),
        Some(PathBuf::from("/usr/bin")),
        Some(PathBuf::from("/bin")),
    ];

    for path in common_paths.iter().flatten() {
        let exe_path = path.join(name);
        if exe_path.exists() {
            debug!(name = name, path = %exe_path.display(), "Found executable in common path");
            return Some(exe_path);
        }
    }

    // Fall back to PATH lookup
    which::which(name).ok()
}

/// Compile-then-run toolchains for compiled languages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toolchain {
    Rustc,
    Gcc,
    Gxx,
    Javac,
}

impl Toolchain {
    pub fn compiler(&self) -> &'static str {
        match self {
            Toolchain::Rustc => "rustc",
            Toolchain::Gcc => "gcc",
            Toolchain::Gxx => "g++",
            Toolchain::Javac => "javac",
        }
    }

    /// Where the compile step leaves its artifact
    fn output_path(&self, source: &Path) -> PathBuf {
        match self {
            // javac drops .class files next to the source
            Toolchain::Javac => source.parent().unwrap_or_else(|| Path::new(".")).to_path_buf(),
            _ => source.with_extension(""),
        }
    }

    fn compile_argv(&self, compiler: &str, source: &str, output: &Path) -> Vec<String> {
        match self {
            Toolchain::Javac => vec![compiler.to_string(), source.to_string()],
            _ => vec![
                compiler.to_string(),
                source.to_string(),
                "-o".to_string(),
                output.to_string_lossy().into_owned(),
            ],
        }
    }
}

/// How a given file extension gets executed.
///
/// The table mapping extensions to strategies is injectable: new languages are
/// added by registering a strategy, not by editing a dispatch chain.
#[derive(Debug, Clone)]
pub enum LaunchStrategy {
    /// Invoke an interpreter directly: `program [pre_args...] <file> [args...]`
    Interpreter {
        program: String,
        pre_args: Vec<String>,
    },
    /// Run through the OS shell (`cmd /C` on Windows, `sh` elsewhere)
    Shell,
    /// `powershell -ExecutionPolicy Bypass -File <file>`
    PowerShell,
    /// Compile synchronously, then run the artifact
    Compile(Toolchain),
    /// The file is itself the program
    Direct,
    /// Installer package; always runs elevated
    Installer,
    /// Hand off to the OS "open with default application" handler
    OsOpen,
}

impl LaunchStrategy {
    pub fn interpreter(program: &str) -> Self {
        LaunchStrategy::Interpreter {
            program: program.to_string(),
            pre_args: Vec::new(),
        }
    }

    pub fn interpreter_with(program: &str, pre_args: &[&str]) -> Self {
        LaunchStrategy::Interpreter {
            program: program.to_string(),
            pre_args: pre_args.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LaunchStrategy::Interpreter { .. } => "interpreter",
            LaunchStrategy::Shell => "shell",
            LaunchStrategy::PowerShell => "powershell",
            LaunchStrategy::Compile(_) => "compile",
            LaunchStrategy::Direct => "direct",
            LaunchStrategy::Installer => "installer",
            LaunchStrategy::OsOpen => "open",
        }
    }
}

/// Extension -> strategy mapping
#[derive(Debug, Clone)]
pub struct DispatchTable {
    strategies: HashMap<String, LaunchStrategy>,
}

impl DispatchTable {
    pub fn empty() -> Self {
        DispatchTable {
            strategies: HashMap::new(),
        }
    }

    /// The default table covering the supported interpreters, shells, and
    /// compile-then-run toolchains.
    pub fn with_defaults() -> Self {
        let mut table = Self::empty();
        table.register("py", LaunchStrategy::interpreter("python3"));
        table.register("js", LaunchStrategy::interpreter("node"));
        table.register("ts", LaunchStrategy::interpreter_with("bun", &["run"]));
        table.register("rb", LaunchStrategy::interpreter("ruby"));
        table.register("php", LaunchStrategy::interpreter("php"));
        table.register("pl", LaunchStrategy::interpreter("perl"));
        table.register("sh", LaunchStrategy::interpreter("bash"));
        table.register("go", LaunchStrategy::interpreter_with("go", &["run"]));
        table.register("bat", LaunchStrategy::Shell);
        table.register("cmd", LaunchStrategy::Shell);
        table.register("ps1", LaunchStrategy::PowerShell);
        table.register("c", LaunchStrategy::Compile(Toolchain::Gcc));
        table.register("cpp", LaunchStrategy::Compile(Toolchain::Gxx));
        table.register("cc", LaunchStrategy::Compile(Toolchain::Gxx));
        table.register("rs", LaunchStrategy::Compile(Toolchain::Rustc));
        table.register("java", LaunchStrategy::Compile(Toolchain::Javac));
        table.register("exe", LaunchStrategy::Direct);
        table.register("msi", LaunchStrategy::Installer);
        table
    }

    pub fn register(&mut self, extension: &str, strategy: LaunchStrategy) {
        self.strategies
            .insert(extension.to_ascii_lowercase(), strategy);
    }

    pub fn strategy_for(&self, path: &Path) -> Option<&LaunchStrategy> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.strategies.get(&ext)
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        self.strategy_for(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Per-launch options supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub args: Vec<String>,
    /// Defaults to the source file's parent directory
    pub working_dir: Option<PathBuf>,
    pub elevated: bool,
}

/// A synchronous compile step that must succeed before the run step
#[derive(Debug, Clone)]
pub struct CompileStep {
    pub argv: Vec<String>,
    pub output: PathBuf,
}

/// A fully resolved launch: interpreter located, argv built, compile step
/// planned. Resolution fails synchronously for missing files, missing
/// interpreters, and unsupported elevation - before any execution id exists.
#[derive(Debug, Clone)]
pub struct ResolvedLaunch {
    pub argv: Vec<String>,
    pub compile: Option<CompileStep>,
    pub working_dir: PathBuf,
    pub strategy_label: &'static str,
    pub elevated: bool,
}

impl ResolvedLaunch {
    pub fn command_line(&self) -> Vec<String> {
        self.argv.clone()
    }
}

/// Wrapper that tracks process ID for cleanup.
/// Stores the PID at spawn time so the process group can be killed even after
/// the Child is moved or consumed.
#[derive(Debug)]
pub struct ProcessHandle {
    /// Process ID (used as PGID since we spawn with process_group(0))
    pub(crate) pid: u32,
    pub(crate) killed: bool,
}

impl ProcessHandle {
    pub fn new(pid: u32) -> Self {
        Self { pid, killed: false }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Kill the process group with graceful escalation (Unix) or just the
    /// process (other platforms).
    ///
    /// Sends SIGTERM first, waits a short grace period for the group to exit,
    /// then escalates to SIGKILL. Checks group liveness rather than just the
    /// leader PID so orphaned children are not left behind.
    pub fn kill(&mut self) {
        /// Grace period after SIGTERM before escalating to SIGKILL (milliseconds)
        const TERM_GRACE_MS: u64 = 250;
        const KILL_POLL_MS: u64 = 50;

        if self.killed {
            debug!(pid = self.pid, "Process already killed, skipping");
            return;
        }
        self.killed = true;

        #[cfg(unix)]
        {
            use unix_process::{kill_process_group, process_group_alive, SIGKILL, SIGTERM};

            let pgid = self.pid;
            match kill_process_group(pgid, SIGTERM) {
                Ok(()) => debug!(pgid = pgid, "SIGTERM sent to process group"),
                Err("No such process group") => {
                    debug!(pgid = pgid, "Process group already exited");
                    return;
                }
                Err(e) => {
                    warn!(pgid = pgid, error = e, "Failed to send SIGTERM");
                    // Continue to try SIGKILL anyway
                }
            }

            let start = Instant::now();
            let grace = Duration::from_millis(TERM_GRACE_MS);
            while start.elapsed() < grace {
                if !process_group_alive(pgid) {
                    debug!(pgid = pgid, "Process group terminated gracefully after SIGTERM");
                    return;
                }
                std::thread::sleep(Duration::from_millis(KILL_POLL_MS));
            }

            match kill_process_group(pgid, SIGKILL) {
                Ok(()) => info!(pgid = pgid, "Process group killed with SIGKILL"),
                Err("No such process group") => {
                    debug!(pgid = pgid, "Process group exited just before SIGKILL");
                }
                Err(e) => error!(pgid = pgid, error = e, "SIGKILL failed"),
            }
        }

        #[cfg(not(unix))]
        {
            debug!(pid = self.pid, "Non-Unix platform: process marked as killed");
        }
    }

    /// Check if the process group is still running (Unix only)
    #[cfg(unix)]
    pub fn is_alive(&self) -> bool {
        unix_process::process_group_alive(self.pid)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Final result of waiting for a launched process
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl ProcessOutcome {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && !self.cancelled && self.exit_code == Some(0)
    }
}

/// A spawned child process with captured output streams.
///
/// Output is drained by background reader threads so the child can never
/// block on a full pipe. `wait_with_timeout` consumes the handle: every
/// launch resolves to exactly one [`ProcessOutcome`].
pub struct LaunchedProcess {
    child: Child,
    handle: ProcessHandle,
    pub command: Vec<String>,
    spawned_at: Instant,
    cancel_flag: Arc<AtomicBool>,
    stdout_rx: Receiver<String>,
    stderr_rx: Receiver<String>,
}

impl LaunchedProcess {
    pub fn pid(&self) -> u32 {
        self.handle.pid
    }

    /// Wall clock starts at spawn, so launch overhead counts against the
    /// caller's timeout budget.
    pub fn spawned_at(&self) -> Instant {
        self.spawned_at
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Force-terminate the process group
    pub fn kill(&mut self) {
        self.handle.kill();
        let _ = self.child.kill();
    }

    /// Block until the child exits, is cancelled, or exceeds `timeout`
    /// (measured from spawn). On expiry or cancellation the process group is
    /// killed and whatever output was captured up to that point is returned.
    ///
    /// A cancel beats a timeout landing in the same window. A cancel that
    /// arrives after the child already exited cleanly does not rewrite the
    /// outcome; only a kill or failing exit reads as cancelled.
    pub fn wait_with_timeout(mut self, timeout: Duration) -> ProcessOutcome {
        let deadline = self.spawned_at + timeout;
        let mut timed_out = false;
        let mut cancelled = false;

        let exit_code = loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    // A cancel that raced a clean exit is a no-op on the
                    // outcome; a cancel that killed or failed the run wins
                    if status.code() != Some(0) && self.cancel_flag.load(Ordering::SeqCst) {
                        cancelled = true;
                    }
                    break status.code();
                }
                Ok(None) => {
                    if self.cancel_flag.load(Ordering::SeqCst) {
                        debug!(pid = self.handle.pid, "Cancellation requested, killing process group");
                        cancelled = true;
                        self.handle.kill();
                        break self.child.wait().ok().and_then(|s| s.code());
                    }
                    if Instant::now() >= deadline {
                        warn!(
                            pid = self.handle.pid,
                            timeout_secs = timeout.as_secs_f64(),
                            "Process exceeded timeout, killing process group"
                        );
                        timed_out = true;
                        // Cancel still wins if it lands in the same window
                        cancelled = self.cancel_flag.load(Ordering::SeqCst);
                        self.handle.kill();
                        break self.child.wait().ok().and_then(|s| s.code());
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    error!(pid = self.handle.pid, error = %e, "Failed to poll child process");
                    break None;
                }
            }
        };

        // The leader has exited, but a grandchild that inherited the pipes
        // can hold them open past that. Bound each drain by the remaining
        // budget and kill the group when it expires, so the reader threads
        // see EOF and the supervisor never stalls.
        let stdout = match self.stdout_rx.recv_timeout(remaining_budget(deadline)) {
            Ok(out) => out,
            Err(_) => {
                warn!(pid = self.handle.pid, "Output pipes still open after exit, killing process group");
                self.handle.kill();
                self.stdout_rx
                    .recv_timeout(PIPE_DRAIN_GRACE)
                    .unwrap_or_default()
            }
        };
        let stderr = match self.stderr_rx.recv_timeout(remaining_budget(deadline)) {
            Ok(out) => out,
            Err(_) => {
                self.handle.kill();
                self.stderr_rx
                    .recv_timeout(PIPE_DRAIN_GRACE)
                    .unwrap_or_default()
            }
        };

        // Don't re-kill the (possibly reused) pgid on drop
        self.handle.killed = true;

        ProcessOutcome {
            exit_code,
            stdout,
            stderr,
            timed_out: timed_out && !cancelled,
            cancelled,
        }
    }
}

/// Time left before `deadline`, with a floor so post-kill drains still get a
/// short window for the readers to deliver.
fn remaining_budget(deadline: Instant) -> Duration {
    deadline
        .saturating_duration_since(Instant::now())
        .max(PIPE_DRAIN_GRACE)
}

/// Drain a child output pipe on a dedicated thread.
/// The accumulated text is delivered once the pipe closes (process exit or kill).
fn spawn_output_reader<R: Read + Send + 'static>(stream: R) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut reader = std::io::BufReader::new(stream);
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

/// Resolves launch strategies and spawns child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    table: DispatchTable,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(table: DispatchTable) -> Self {
        ProcessLauncher { table }
    }

    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut DispatchTable {
        &mut self.table
    }

    /// Resolve a path into a launch plan.
    ///
    /// All launch-error conditions (missing file, missing interpreter,
    /// unsupported elevation) surface here, synchronously. Unrecognized
    /// extensions fall back to the OS open handler rather than erroring.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn resolve(&self, path: &Path, options: &LaunchOptions) -> Result<ResolvedLaunch> {
        if !path.exists() {
            return Err(LaunchError::FileNotFound(path.to_path_buf()));
        }
        let path_str = path
            .to_str()
            .ok_or_else(|| LaunchError::InvalidPath(path.to_path_buf()))?;

        let strategy = self
            .table
            .strategy_for(path)
            .cloned()
            .unwrap_or(LaunchStrategy::OsOpen);

        let working_dir = options
            .working_dir
            .clone()
            .or_else(|| path.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        // Installers always run elevated, regardless of the caller's flag
        let elevated = options.elevated || matches!(strategy, LaunchStrategy::Installer);

        let (mut argv, compile) = self.build_plan(&strategy, path, path_str, &options.args)?;

        if elevated {
            argv = wrap_elevated(argv)?;
        }

        debug!(argv = ?argv, strategy = strategy.label(), "Resolved launch plan");
        Ok(ResolvedLaunch {
            argv,
            compile,
            working_dir,
            strategy_label: strategy.label(),
            elevated,
        })
    }

    fn build_plan(
        &self,
        strategy: &LaunchStrategy,
        path: &Path,
        path_str: &str,
        args: &[String],
    ) -> Result<(Vec<String>, Option<CompileStep>)> {
        match strategy {
            LaunchStrategy::Interpreter { program, pre_args } => {
                let resolved = require_program(program)?;
                let mut argv = vec![resolved];
                argv.extend(pre_args.iter().cloned());
                argv.push(path_str.to_string());
                argv.extend(args.iter().cloned());
                Ok((argv, None))
            }
            LaunchStrategy::Shell => {
                let mut argv = if cfg!(windows) {
                    vec!["cmd".to_string(), "/C".to_string(), path_str.to_string()]
                } else {
                    let sh = require_program("sh")?;
                    vec![sh, path_str.to_string()]
                };
                argv.extend(args.iter().cloned());
                Ok((argv, None))
            }
            LaunchStrategy::PowerShell => {
                let program = find_executable("pwsh")
                    .or_else(|| find_executable("powershell"))
                    .ok_or_else(|| LaunchError::InterpreterMissing {
                        program: "powershell".to_string(),
                    })?;
                let mut argv = vec![
                    program.to_string_lossy().into_owned(),
                    "-ExecutionPolicy".to_string(),
                    "Bypass".to_string(),
                    "-File".to_string(),
                    path_str.to_string(),
                ];
                argv.extend(args.iter().cloned());
                Ok((argv, None))
            }
            LaunchStrategy::Compile(toolchain) => {
                let compiler = require_program(toolchain.compiler())?;
                let output = toolchain.output_path(path);
                let compile = CompileStep {
                    argv: toolchain.compile_argv(&compiler, path_str, &output),
                    output: output.clone(),
                };

                let argv = match toolchain {
                    Toolchain::Javac => {
                        let java = require_program("java")?;
                        let class_name = path
                            .file_stem()
                            .and_then(|s| s.to_str())
                            .ok_or_else(|| LaunchError::InvalidPath(path.to_path_buf()))?;
                        let mut argv = vec![
                            java,
                            "-cp".to_string(),
                            output.to_string_lossy().into_owned(),
                            class_name.to_string(),
                        ];
                        argv.extend(args.iter().cloned());
                        argv
                    }
                    _ => {
                        let mut argv = vec![output.to_string_lossy().into_owned()];
                        argv.extend(args.iter().cloned());
                        argv
                    }
                };
                Ok((argv, Some(compile)))
            }
            LaunchStrategy::Direct | LaunchStrategy::Installer => {
                let mut argv = vec![path_str.to_string()];
                argv.extend(args.iter().cloned());
                Ok((argv, None))
            }
            LaunchStrategy::OsOpen => {
                let mut commands = open::commands(path_str);
                let command = commands
                    .drain(..)
                    .next()
                    .ok_or_else(|| LaunchError::NoOpenHandler(path.to_path_buf()))?;
                let mut argv = vec![command.get_program().to_string_lossy().into_owned()];
                argv.extend(
                    command
                        .get_args()
                        .map(|a| a.to_string_lossy().into_owned()),
                );
                Ok((argv, None))
            }
        }
    }

    /// Run the synchronous compile step, if the plan has one.
    ///
    /// A non-zero compiler exit fails the launch here; the run step is never
    /// attempted against a stale artifact.
    #[instrument(skip_all)]
    pub fn compile(&self, resolved: &ResolvedLaunch) -> Result<()> {
        let Some(ref step) = resolved.compile else {
            return Ok(());
        };

        debug!(argv = ?step.argv, "Running compile step");
        let output = Command::new(&step.argv[0])
            .args(&step.argv[1..])
            .current_dir(&resolved.working_dir)
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => LaunchError::InterpreterMissing {
                    program: step.argv[0].clone(),
                },
                _ => LaunchError::Spawn {
                    program: step.argv[0].clone(),
                    source: e,
                },
            })?;

        if output.status.success() {
            debug!(output = %step.output.display(), "Compile step succeeded");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(
                exit_code = ?output.status.code(),
                "Compile step failed"
            );
            Err(LaunchError::Compile {
                exit_code: output.status.code(),
                stderr,
            })
        }
    }

    /// Spawn the run step of a resolved launch.
    #[instrument(skip_all, fields(program = %resolved.argv[0]))]
    pub fn spawn(
        &self,
        resolved: &ResolvedLaunch,
        cancel_flag: Arc<AtomicBool>,
    ) -> Result<LaunchedProcess> {
        let program = &resolved.argv[0];
        let mut command = Command::new(program);
        command
            .args(&resolved.argv[1..])
            .current_dir(&resolved.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Spawn in a new process group so the whole tree can be killed.
        // process_group(0) means the child's PID becomes the PGID.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            error!(error = %e, program = %program, "Process spawn failed");
            if resolved.elevated {
                LaunchError::Elevation(format!("failed to spawn '{}': {}", program, e))
            } else if e.kind() == std::io::ErrorKind::NotFound {
                LaunchError::InterpreterMissing {
                    program: program.clone(),
                }
            } else {
                LaunchError::Spawn {
                    program: program.clone(),
                    source: e,
                }
            }
        })?;

        let pid = child.id();
        info!(pid = pid, pgid = pid, program = %program, "Process spawned");

        let stdout_rx = child
            .stdout
            .take()
            .map(spawn_output_reader)
            .unwrap_or_else(|| mpsc::channel().1);
        let stderr_rx = child
            .stderr
            .take()
            .map(spawn_output_reader)
            .unwrap_or_else(|| mpsc::channel().1);

        Ok(LaunchedProcess {
            child,
            handle: ProcessHandle::new(pid),
            command: resolved.argv.clone(),
            spawned_at: Instant::now(),
            cancel_flag,
            stdout_rx,
            stderr_rx,
        })
    }

    /// Resolve, compile, and spawn in one step (background-style launch).
    pub fn launch(&self, path: &Path, options: &LaunchOptions) -> Result<LaunchedProcess> {
        let resolved = self.resolve(path, options)?;
        self.compile(&resolved)?;
        self.spawn(&resolved, Arc::new(AtomicBool::new(false)))
    }

    /// Foreground launch: blocks until completion-or-timeout and returns a
    /// fully populated outcome instead of a handle.
    pub fn run_foreground(
        &self,
        path: &Path,
        options: &LaunchOptions,
        timeout: Duration,
    ) -> Result<ProcessOutcome> {
        let launched = self.launch(path, options)?;
        Ok(launched.wait_with_timeout(timeout))
    }
}

fn require_program(name: &str) -> Result<String> {
    find_executable(name)
        .map(|p| p.to_string_lossy().into_owned())
        .ok_or_else(|| LaunchError::InterpreterMissing {
            program: name.to_string(),
        })
}

/// Wrap an argv with the platform's elevation invocation.
/// `sudo -n` keeps the launch non-interactive; a password prompt would hang a
/// GUI-spawned child forever.
fn wrap_elevated(argv: Vec<String>) -> Result<Vec<String>> {
    #[cfg(unix)]
    {
        let sudo = find_executable("sudo")
            .ok_or_else(|| LaunchError::Elevation("sudo not available".to_string()))?;
        let mut wrapped = vec![sudo.to_string_lossy().into_owned(), "-n".to_string()];
        wrapped.extend(argv);
        Ok(wrapped)
    }
    #[cfg(not(unix))]
    {
        let _ = argv;
        Err(LaunchError::ElevationUnsupported)
    }
}

#[cfg(test)]
#[path = "launcher_tests.rs"]
mod tests;

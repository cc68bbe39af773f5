//! Taskdock CLI.
//!
//! Thin command-line front end over the execution engine: run a file with
//! full status tracking, inspect history and per-script stats, and clean up
//! state left behind by a crashed session.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use taskdock::engine::{Execution, ExecutionEngine};
use taskdock::launcher::{LaunchOptions, ProcessLauncher};
use taskdock::manager::ExecutionStatusManager;
use taskdock::registry::ProcessRegistry;
use taskdock::status::ExecutionStatus;
use taskdock::{config, logging};
use tracing::info;

#[derive(Parser)]
#[command(name = "taskdock", version, about = "Run scripts and programs with status tracking")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a file and wait for it to finish
    Run {
        /// File to execute
        path: PathBuf,
        /// Arguments passed through to the program
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
        /// Run with elevated privileges
        #[arg(long)]
        elevated: bool,
        /// Return immediately; the process keeps running detached and its
        /// outcome is not recorded in history
        #[arg(long)]
        background: bool,
        /// Override the configured timeout, in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Show execution history, most recent first
    History {
        /// Only show runs of this file
        #[arg(long)]
        path: Option<PathBuf>,
        /// Maximum entries to show
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Show performance statistics
    Stats {
        /// Stats for one file; omit for the whole-history aggregate
        path: Option<PathBuf>,
    },
    /// Kill orphaned processes and clear stale state from a previous session
    Cleanup,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let config = config::load_config();
    let _logging_guard = logging::init(&config.data_dir());

    let manager = Arc::new(ExecutionStatusManager::new(config.history_limit));
    manager.load_history(&config.history_path());
    let registry = Arc::new(ProcessRegistry::new(
        config.main_pid_path(),
        config.active_pids_path(),
    ));

    match cli.command {
        Commands::Run {
            path,
            args,
            elevated,
            background,
            timeout,
        } => {
            let mut config = config;
            if let Some(seconds) = timeout {
                config.timeout_seconds = seconds;
            }
            let history_path = config.history_path();
            // Only a crashed session's leftovers get killed; children a
            // clean `run --background` left behind keep running
            registry.cleanup_if_crashed();
            if let Err(e) = registry.write_main_pid() {
                tracing::warn!(error = %e, "Failed to write main PID file");
            }

            let engine = ExecutionEngine::new(
                ProcessLauncher::new(),
                manager.clone(),
                registry.clone(),
                config,
            );
            let options = LaunchOptions {
                args,
                working_dir: None,
                elevated,
            };

            let code = match engine.execute_file(&path, &options, background) {
                Ok(Execution::Background { execution_id }) => {
                    println!("started {execution_id}");
                    0
                }
                Ok(Execution::Foreground { record }) => {
                    print!("{}", record.stdout);
                    eprint!("{}", record.stderr);
                    info!(
                        execution_id = %record.execution_id,
                        status = %record.status,
                        duration = ?record.duration_seconds(),
                        "Run finished"
                    );
                    match record.status {
                        ExecutionStatus::Success => 0,
                        _ => record.exit_code.unwrap_or(1).clamp(0, 255) as u8,
                    }
                }
                Err(e) => {
                    eprintln!("error: {}", e.user_message());
                    2
                }
            };

            if let Err(e) = manager.save_history(&history_path) {
                tracing::warn!(error = %e, "Failed to save execution history");
            }
            registry.remove_main_pid();
            std::process::ExitCode::from(code)
        }
        Commands::History { path, limit } => {
            let records = manager.get_execution_history(path.as_deref(), limit);
            if records.is_empty() {
                println!("no executions recorded");
            }
            for record in records {
                let duration = record
                    .duration_seconds()
                    .map(|d| format!("{d:.2}s"))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {:<9}  {}  {}",
                    record.start_time.format("%Y-%m-%d %H:%M:%S"),
                    record.status,
                    duration,
                    record.script_id
                );
            }
            std::process::ExitCode::SUCCESS
        }
        Commands::Stats { path } => {
            match path {
                Some(path) => {
                    let script_id = path.to_string_lossy();
                    match manager.get_performance_stats(&script_id) {
                        Some(stats) => {
                            println!("executions:   {}", stats.total_executions);
                            println!("success rate: {:.1}%", stats.success_rate);
                            println!("avg duration: {:.2}s", stats.avg_duration);
                            println!("min duration: {:.2}s", stats.min_duration);
                            println!("max duration: {:.2}s", stats.max_duration);
                            println!("last run:     {}", stats.last_execution.format("%Y-%m-%d %H:%M:%S"));
                        }
                        None => println!("no executions recorded for {}", path.display()),
                    }
                }
                None => {
                    let stats = manager.get_statistics();
                    println!("executions:   {}", stats.total_executions);
                    println!("success rate: {:.1}%", stats.success_rate);
                    println!("avg duration: {:.2}s", stats.average_duration);
                    if !stats.most_executed.is_empty() {
                        println!("most executed:");
                        for (script, count) in &stats.most_executed {
                            println!("  {count:>5}  {script}");
                        }
                    }
                }
            }
            std::process::ExitCode::SUCCESS
        }
        Commands::Cleanup => {
            let killed = registry.cleanup_orphans();
            if registry.is_main_pid_stale() {
                registry.remove_main_pid();
                println!("removed stale pid file");
            }
            println!("killed {killed} orphaned process(es)");
            std::process::ExitCode::SUCCESS
        }
    }
}

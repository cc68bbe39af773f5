use super::*;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

fn write_script(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_default_table_covers_core_extensions() {
    let table = DispatchTable::with_defaults();
    for ext in [
        "py", "js", "ts", "rb", "php", "pl", "sh", "go", "bat", "cmd", "ps1", "c", "cpp", "cc",
        "rs", "java", "exe", "msi",
    ] {
        assert!(
            table.strategy_for(Path::new(&format!("x.{ext}"))).is_some(),
            "no strategy for .{ext}"
        );
    }
}

#[test]
fn test_extension_matching_is_case_insensitive() {
    let table = DispatchTable::with_defaults();
    assert!(table.is_supported(Path::new("SCRIPT.PY")));
    assert!(table.is_supported(Path::new("Tool.Rs")));
}

#[test]
fn test_unknown_extension_has_no_strategy() {
    let table = DispatchTable::with_defaults();
    assert!(table.strategy_for(Path::new("photo.xyz")).is_none());
    assert!(table.strategy_for(Path::new("no_extension")).is_none());
}

#[test]
fn test_register_overrides_existing_strategy() {
    let mut table = DispatchTable::with_defaults();
    table.register("py", LaunchStrategy::interpreter("pypy3"));

    match table.strategy_for(Path::new("a.py")) {
        Some(LaunchStrategy::Interpreter { program, .. }) => assert_eq!(program, "pypy3"),
        other => panic!("unexpected strategy: {other:?}"),
    }
}

#[test]
fn test_strategy_labels() {
    assert_eq!(LaunchStrategy::interpreter("node").label(), "interpreter");
    assert_eq!(LaunchStrategy::Shell.label(), "shell");
    assert_eq!(LaunchStrategy::Compile(Toolchain::Rustc).label(), "compile");
    assert_eq!(LaunchStrategy::Installer.label(), "installer");
    assert_eq!(LaunchStrategy::OsOpen.label(), "open");
}

#[test]
fn test_toolchain_output_paths() {
    assert_eq!(
        Toolchain::Rustc.output_path(Path::new("/src/tool.rs")),
        PathBuf::from("/src/tool")
    );
    assert_eq!(
        Toolchain::Gcc.output_path(Path::new("/src/tool.c")),
        PathBuf::from("/src/tool")
    );
    // javac drops class files next to the source
    assert_eq!(
        Toolchain::Javac.output_path(Path::new("/src/Tool.java")),
        PathBuf::from("/src")
    );
}

#[test]
fn test_toolchain_compile_argv_shapes() {
    let argv = Toolchain::Gcc.compile_argv("/usr/bin/gcc", "/src/t.c", Path::new("/src/t"));
    assert_eq!(argv, vec!["/usr/bin/gcc", "/src/t.c", "-o", "/src/t"]);

    let argv = Toolchain::Javac.compile_argv("javac", "/src/T.java", Path::new("/src"));
    assert_eq!(argv, vec!["javac", "/src/T.java"]);
}

#[test]
fn test_resolve_missing_file_fails_fast() {
    let launcher = ProcessLauncher::new();
    let err = launcher
        .resolve(Path::new("/nonexistent/script.py"), &LaunchOptions::default())
        .unwrap_err();
    assert!(matches!(err, LaunchError::FileNotFound(_)));
}

#[test]
fn test_resolve_missing_interpreter_fails_before_spawn() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_script(&dir, "a.zz", "whatever");

    let mut table = DispatchTable::empty();
    table.register("zz", LaunchStrategy::interpreter("definitely-not-a-real-binary-42"));
    let launcher = ProcessLauncher::with_table(table);

    let err = launcher.resolve(&path, &LaunchOptions::default()).unwrap_err();
    match err {
        LaunchError::InterpreterMissing { program } => {
            assert_eq!(program, "definitely-not-a-real-binary-42")
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[cfg(unix)]
#[test]
fn test_resolve_builds_interpreter_argv() {
    let Some(_) = find_executable("sh") else { return };
    let dir = tempfile::tempdir().unwrap();
    let path = write_script(&dir, "hello.sh", "echo hi\n");

    let mut table = DispatchTable::empty();
    table.register("sh", LaunchStrategy::interpreter("sh"));
    let launcher = ProcessLauncher::with_table(table);

    let opts = LaunchOptions {
        args: vec!["--flag".into()],
        ..Default::default()
    };
    let resolved = launcher.resolve(&path, &opts).unwrap();

    assert!(resolved.argv[0].ends_with("sh"));
    assert_eq!(resolved.argv[1], path.to_string_lossy());
    assert_eq!(resolved.argv[2], "--flag");
    assert!(resolved.compile.is_none());
    assert_eq!(resolved.working_dir, dir.path());
    assert!(!resolved.elevated);
}

#[cfg(unix)]
#[test]
fn test_foreground_run_captures_output_and_exit_code() {
    let Some(_) = find_executable("sh") else { return };
    let dir = tempfile::tempdir().unwrap();
    let path = write_script(&dir, "out.sh", "echo stdout-line\necho stderr-line 1>&2\nexit 3\n");

    let mut table = DispatchTable::empty();
    table.register("sh", LaunchStrategy::interpreter("sh"));
    let launcher = ProcessLauncher::with_table(table);

    let outcome = launcher
        .run_foreground(&path, &LaunchOptions::default(), Duration::from_secs(10))
        .unwrap();

    assert_eq!(outcome.exit_code, Some(3));
    assert!(outcome.stdout.contains("stdout-line"));
    assert!(outcome.stderr.contains("stderr-line"));
    assert!(!outcome.timed_out);
    assert!(!outcome.cancelled);
    assert!(!outcome.succeeded());
}

#[cfg(unix)]
#[test]
fn test_timeout_kills_process_and_keeps_partial_output() {
    let Some(_) = find_executable("sh") else { return };
    let dir = tempfile::tempdir().unwrap();
    let path = write_script(&dir, "slow.sh", "echo started\nsleep 30\necho never\n");

    let mut table = DispatchTable::empty();
    table.register("sh", LaunchStrategy::interpreter("sh"));
    let launcher = ProcessLauncher::with_table(table);

    let resolved = launcher.resolve(&path, &LaunchOptions::default()).unwrap();
    let launched = launcher
        .spawn(&resolved, Arc::new(AtomicBool::new(false)))
        .unwrap();
    let pid = launched.pid();

    let outcome = launched.wait_with_timeout(Duration::from_millis(300));

    assert!(outcome.timed_out);
    assert!(!outcome.cancelled);
    assert!(!outcome.succeeded());
    assert!(!outcome.stdout.contains("never"));

    // The group was actually killed, not just marked
    let probe = ProcessHandle { pid, killed: true };
    assert!(!probe.is_alive());
}

#[cfg(unix)]
#[test]
fn test_cancel_flag_wins_over_timeout() {
    let Some(_) = find_executable("sh") else { return };
    let dir = tempfile::tempdir().unwrap();
    let path = write_script(&dir, "slow.sh", "sleep 30\n");

    let mut table = DispatchTable::empty();
    table.register("sh", LaunchStrategy::interpreter("sh"));
    let launcher = ProcessLauncher::with_table(table);

    let resolved = launcher.resolve(&path, &LaunchOptions::default()).unwrap();
    let cancel = Arc::new(AtomicBool::new(false));
    let launched = launcher.spawn(&resolved, cancel.clone()).unwrap();

    cancel.store(true, Ordering::SeqCst);
    let outcome = launched.wait_with_timeout(Duration::from_millis(50));

    assert!(outcome.cancelled);
    assert!(!outcome.timed_out);
}

#[cfg(unix)]
#[test]
fn test_cancel_after_clean_exit_keeps_success_outcome() {
    let Some(_) = find_executable("sh") else { return };
    let dir = tempfile::tempdir().unwrap();
    let path = write_script(&dir, "quick.sh", "echo done\nexit 0\n");

    let mut table = DispatchTable::empty();
    table.register("sh", LaunchStrategy::interpreter("sh"));
    let launcher = ProcessLauncher::with_table(table);

    let resolved = launcher.resolve(&path, &LaunchOptions::default()).unwrap();
    let cancel = Arc::new(AtomicBool::new(false));
    let launched = launcher.spawn(&resolved, cancel.clone()).unwrap();

    // Let the child finish, then cancel too late to matter
    std::thread::sleep(Duration::from_millis(500));
    cancel.store(true, Ordering::SeqCst);
    let outcome = launched.wait_with_timeout(Duration::from_secs(10));

    assert_eq!(outcome.exit_code, Some(0));
    assert!(!outcome.cancelled);
    assert!(outcome.succeeded());
}

#[cfg(unix)]
#[test]
fn test_lingering_grandchild_does_not_stall_output_drain() {
    let Some(_) = find_executable("sh") else { return };
    let dir = tempfile::tempdir().unwrap();
    // The backgrounded sleep inherits the output pipes and outlives the leader
    let path = write_script(&dir, "forker.sh", "sleep 30 &\necho started\nexit 0\n");

    let mut table = DispatchTable::empty();
    table.register("sh", LaunchStrategy::interpreter("sh"));
    let launcher = ProcessLauncher::with_table(table);

    let resolved = launcher.resolve(&path, &LaunchOptions::default()).unwrap();
    let launched = launcher
        .spawn(&resolved, Arc::new(AtomicBool::new(false)))
        .unwrap();

    let started = Instant::now();
    let outcome = launched.wait_with_timeout(Duration::from_secs(2));

    // The drain gave up at the budget and killed the group instead of
    // blocking until the grandchild's pipes closed on their own
    assert!(started.elapsed() < Duration::from_secs(15));
    assert_eq!(outcome.exit_code, Some(0));
    assert!(!outcome.timed_out);
    assert!(outcome.stdout.contains("started"));
}

#[cfg(unix)]
#[test]
fn test_compile_step_failure_reports_compiler_stderr() {
    // Use `sh -c 'exit 1'`-style failure via a fake "compiler" script
    let Some(_) = find_executable("sh") else { return };
    let dir = tempfile::tempdir().unwrap();
    let source = write_script(&dir, "broken.zz", "not real code");

    let resolved = ResolvedLaunch {
        argv: vec!["true".into()],
        compile: Some(CompileStep {
            argv: vec![
                "sh".into(),
                "-c".into(),
                "echo 'syntax error' 1>&2; exit 2".into(),
            ],
            output: source.with_extension(""),
        }),
        working_dir: dir.path().to_path_buf(),
        strategy_label: "compile",
        elevated: false,
    };

    let launcher = ProcessLauncher::new();
    let err = launcher.compile(&resolved).unwrap_err();
    match err {
        LaunchError::Compile { exit_code, stderr } => {
            assert_eq!(exit_code, Some(2));
            assert!(stderr.contains("syntax error"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[cfg(unix)]
#[test]
fn test_find_executable_locates_shell() {
    assert!(find_executable("sh").is_some());
    assert!(find_executable("definitely-not-a-real-binary-42").is_none());
}

#[test]
fn test_installer_strategy_forces_elevation() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_script(&dir, "setup.msi", "binary-ish");
    let launcher = ProcessLauncher::new();

    match launcher.resolve(&path, &LaunchOptions::default()) {
        Ok(resolved) => {
            assert!(resolved.elevated);
            // sudo -n prefix on Unix
            #[cfg(unix)]
            {
                assert!(resolved.argv[0].ends_with("sudo"));
                assert_eq!(resolved.argv[1], "-n");
            }
        }
        // Hosts without sudo reject elevation at resolve time
        Err(LaunchError::Elevation(_)) | Err(LaunchError::ElevationUnsupported) => {}
        Err(other) => panic!("unexpected error: {other}"),
    }
}

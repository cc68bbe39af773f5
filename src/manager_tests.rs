use super::*;
use crate::launcher::ProcessOutcome;
use std::path::PathBuf;

fn manager() -> ExecutionStatusManager {
    ExecutionStatusManager::new(100)
}

fn start(m: &ExecutionStatusManager, script: &str) -> String {
    m.start_execution(script, &PathBuf::from(script), vec!["sh".into(), script.into()])
}

fn run_to(m: &ExecutionStatusManager, script: &str, status: ExecutionStatus) -> String {
    let id = start(m, script);
    m.update_execution_status(&id, status, None, None);
    id
}

fn outcome(exit_code: Option<i32>) -> ProcessOutcome {
    ProcessOutcome {
        exit_code,
        stdout: "out".into(),
        stderr: "err".into(),
        timed_out: false,
        cancelled: false,
    }
}

#[test]
fn test_terminal_update_archives_record() {
    let m = manager();
    let id = start(&m, "/s/a.sh");
    assert_eq!(m.active_count(), 1);

    m.update_execution_status(&id, ExecutionStatus::Success, Some("done\n"), None);

    assert_eq!(m.active_count(), 0);
    let record = m.get_record(&id).unwrap();
    assert_eq!(record.status, ExecutionStatus::Success);
    assert_eq!(record.stdout, "done\n");
    assert!(record.end_time.is_some());
    assert_eq!(m.get_execution_history(None, 10).len(), 1);
}

#[test]
fn test_update_unknown_id_is_ignored() {
    let m = manager();
    run_to(&m, "/s/a.sh", ExecutionStatus::Success);

    m.update_execution_status("no-such-id", ExecutionStatus::Error, None, None);

    assert_eq!(m.get_execution_history(None, 10).len(), 1);
    assert_eq!(m.active_count(), 0);
    assert!(m.get_record("no-such-id").is_none());
}

#[test]
fn test_complete_execution_installs_outcome() {
    let m = manager();
    let id = start(&m, "/s/a.sh");
    m.complete_execution(&id, ExecutionStatus::Error, &outcome(Some(2)));

    let record = m.get_record(&id).unwrap();
    assert_eq!(record.status, ExecutionStatus::Error);
    assert_eq!(record.exit_code, Some(2));
    assert_eq!(record.stdout, "out");
    assert_eq!(record.stderr, "err");
}

#[test]
fn test_callbacks_observe_running_and_terminal() {
    let m = manager();
    let seen: Arc<Mutex<Vec<ExecutionStatus>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    m.register_status_callback(
        "/s/a.sh",
        Arc::new(move |status, _record| sink.lock().push(status)),
    );

    run_to(&m, "/s/a.sh", ExecutionStatus::Timeout);

    let seen = seen.lock();
    assert_eq!(*seen, vec![ExecutionStatus::Running, ExecutionStatus::Timeout]);
}

#[test]
fn test_callbacks_are_scoped_to_script_id() {
    let m = manager();
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    m.register_status_callback(
        "/s/a.sh",
        Arc::new(move |_status, record| sink.lock().push(record.script_id.clone())),
    );

    run_to(&m, "/s/other.sh", ExecutionStatus::Success);
    assert!(seen.lock().is_empty());

    run_to(&m, "/s/a.sh", ExecutionStatus::Success);
    assert_eq!(seen.lock().len(), 2);
}

#[test]
fn test_unregister_stops_notifications() {
    let m = manager();
    let seen: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
    let sink = seen.clone();
    let id = m.register_status_callback("/s/a.sh", Arc::new(move |_, _| *sink.lock() += 1));

    run_to(&m, "/s/a.sh", ExecutionStatus::Success);
    assert_eq!(*seen.lock(), 2);

    assert!(m.unregister_status_callback("/s/a.sh", id));
    assert!(!m.unregister_status_callback("/s/a.sh", id));

    run_to(&m, "/s/a.sh", ExecutionStatus::Success);
    assert_eq!(*seen.lock(), 2);
}

#[test]
fn test_panicking_callback_does_not_block_others() {
    let m = manager();
    m.register_status_callback("/s/a.sh", Arc::new(|_, _| panic!("observer bug")));

    let seen: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
    let sink = seen.clone();
    m.register_status_callback("/s/a.sh", Arc::new(move |_, _| *sink.lock() += 1));

    run_to(&m, "/s/a.sh", ExecutionStatus::Success);
    assert_eq!(*seen.lock(), 2);
    assert_eq!(m.get_execution_history(None, 10).len(), 1);
}

#[test]
fn test_history_is_most_recent_first_and_filterable() {
    let m = manager();
    let first = run_to(&m, "/s/a.sh", ExecutionStatus::Success);
    let second = run_to(&m, "/s/b.sh", ExecutionStatus::Error);
    let third = run_to(&m, "/s/a.sh", ExecutionStatus::Success);

    let all = m.get_execution_history(None, 10);
    assert_eq!(
        all.iter().map(|r| r.execution_id.as_str()).collect::<Vec<_>>(),
        vec![third.as_str(), second.as_str(), first.as_str()]
    );

    let only_a = m.get_execution_history(Some(Path::new("/s/a.sh")), 10);
    assert_eq!(only_a.len(), 2);
    assert!(only_a.iter().all(|r| r.script_id == "/s/a.sh"));

    assert_eq!(m.get_execution_history(None, 2).len(), 2);
}

#[test]
fn test_history_ring_evicts_oldest() {
    let m = ExecutionStatusManager::new(2);
    run_to(&m, "/s/a.sh", ExecutionStatus::Success);
    run_to(&m, "/s/b.sh", ExecutionStatus::Success);
    run_to(&m, "/s/c.sh", ExecutionStatus::Success);

    let history = m.get_execution_history(None, 10);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].script_id, "/s/c.sh");
    assert_eq!(history[1].script_id, "/s/b.sh");
}

#[test]
fn test_performance_stats_cover_failures_too() {
    let m = manager();
    assert!(m.get_performance_stats("/s/a.sh").is_none());

    run_to(&m, "/s/a.sh", ExecutionStatus::Success);
    run_to(&m, "/s/a.sh", ExecutionStatus::Error);

    let stats = m.get_performance_stats("/s/a.sh").unwrap();
    assert_eq!(stats.total_executions, 2);
    assert!((stats.success_rate - 50.0).abs() < f64::EPSILON);
    assert!(stats.min_duration <= stats.avg_duration);
    assert!(stats.avg_duration <= stats.max_duration);
}

#[test]
fn test_stats_follow_history_eviction() {
    let m = ExecutionStatusManager::new(1);
    run_to(&m, "/s/a.sh", ExecutionStatus::Success);
    run_to(&m, "/s/b.sh", ExecutionStatus::Success);

    // a.sh's only record was evicted, so its stats are gone with it
    assert!(m.get_performance_stats("/s/a.sh").is_none());
    assert_eq!(m.get_performance_stats("/s/b.sh").unwrap().total_executions, 1);
}

#[test]
fn test_running_execution_has_no_stats_yet() {
    let m = manager();
    start(&m, "/s/a.sh");
    assert!(m.get_performance_stats("/s/a.sh").is_none());
}

#[test]
fn test_last_status_for_path() {
    let m = manager();
    assert!(m.last_status_for(Path::new("/s/a.sh")).is_none());

    run_to(&m, "/s/a.sh", ExecutionStatus::Error);
    run_to(&m, "/s/a.sh", ExecutionStatus::Success);

    assert_eq!(
        m.last_status_for(Path::new("/s/a.sh")),
        Some(ExecutionStatus::Success)
    );
}

#[test]
fn test_aggregate_statistics() {
    let m = manager();
    let stats = m.get_statistics();
    assert_eq!(stats.total_executions, 0);
    assert_eq!(stats.success_rate, 0.0);

    run_to(&m, "/s/a.sh", ExecutionStatus::Success);
    run_to(&m, "/s/a.sh", ExecutionStatus::Success);
    run_to(&m, "/s/b.sh", ExecutionStatus::Error);
    start(&m, "/s/c.sh");

    let stats = m.get_statistics();
    assert_eq!(stats.total_executions, 3);
    assert!((stats.success_rate - (2.0 / 3.0 * 100.0)).abs() < 1e-9);
    assert_eq!(stats.most_executed[0], ("/s/a.sh".to_string(), 2));
    assert_eq!(stats.active_count, 1);
}

#[test]
fn test_history_save_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");

    let m = manager();
    run_to(&m, "/s/a.sh", ExecutionStatus::Success);
    run_to(&m, "/s/a.sh", ExecutionStatus::Timeout);
    m.save_history(&path).unwrap();

    let restored = ExecutionStatusManager::new(100);
    assert_eq!(restored.load_history(&path), 2);
    assert_eq!(restored.get_execution_history(None, 10).len(), 2);
    assert_eq!(
        restored.last_status_for(Path::new("/s/a.sh")),
        Some(ExecutionStatus::Timeout)
    );
    // Stats are rebuilt from the loaded records
    assert_eq!(
        restored.get_performance_stats("/s/a.sh").unwrap().total_executions,
        2
    );
}

#[test]
fn test_load_skips_malformed_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");

    let m = manager();
    run_to(&m, "/s/a.sh", ExecutionStatus::Success);
    let good = serde_json::to_value(&m.get_execution_history(None, 1)[0]).unwrap();
    let blob = serde_json::json!([good, {"not": "a record"}, 42]);
    std::fs::write(&path, serde_json::to_string(&blob).unwrap()).unwrap();

    let restored = ExecutionStatusManager::new(100);
    assert_eq!(restored.load_history(&path), 1);
}

#[test]
fn test_load_missing_file_is_empty() {
    let m = manager();
    assert_eq!(m.load_history(Path::new("/nonexistent/history.json")), 0);
    assert!(m.get_execution_history(None, 10).is_empty());
}

#[test]
fn test_clear_history_drops_stats() {
    let m = manager();
    run_to(&m, "/s/a.sh", ExecutionStatus::Success);
    m.clear_history();
    assert!(m.get_execution_history(None, 10).is_empty());
    assert!(m.get_performance_stats("/s/a.sh").is_none());
}

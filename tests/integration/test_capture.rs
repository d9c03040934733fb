//! Integration tests for per-host capture against an in-memory fleet

use crate::fixtures::FakeExecutor;
use diagcap::io::fs::RealFileSystem;
use diagcap::models::HostCapture;
use diagcap::services::capture::{CaptureConfig, HostScopedStrategy, capture_host, compile_excludes};
use diagcap::services::fleet::{FleetRequest, capture_fleet};
use diagcap::services::shutdown::CancelToken;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const CONF: &str = "/opt/app/conf";
const LOGS: &str = "/var/log/app";

fn template(executor: Arc<FakeExecutor>, staging: &Path, excludes: &[&str]) -> CaptureConfig {
    let excludes: Vec<String> = excludes.iter().map(|s| (*s).to_string()).collect();
    CaptureConfig {
        host: String::new(),
        is_coordinator: false,
        conf_dir: CONF.to_string(),
        log_dir: LOGS.to_string(),
        gc_log_dir: None,
        log_age_days: 0,
        excludes: compile_excludes(&excludes).unwrap(),
        max_depth: 4,
        jvm_process: "java".to_string(),
        strategy: Arc::new(HostScopedStrategy::new(staging)),
        executor,
        fs: Arc::new(RealFileSystem),
    }
}

fn for_host(template: &CaptureConfig, host: &str, is_coordinator: bool) -> CaptureConfig {
    CaptureConfig {
        host: host.to_string(),
        is_coordinator,
        ..template.clone()
    }
}

fn scenario_a() -> FakeExecutor {
    FakeExecutor::new()
        .with_file("10.0.0.1", "/opt/app/conf/app.conf", b"memory=8g\n")
        .with_file("10.0.0.1", "/var/log/app/server.log", b"coordinator started\n")
        .with_file("10.0.0.1", "/var/log/app/queries.json", b"")
        .with_file("10.0.0.2", "/var/log/app/server.log", b"executor started\n")
        .with_file("10.0.0.2", "/var/log/app/server.log.1", b"rotated\n")
        .with_file("10.0.0.2", "/var/log/app/spill.tmp", b"scratch\n")
}

fn totals(captures: &[HostCapture]) -> (usize, usize, usize) {
    captures.iter().fold((0, 0, 0), |(c, f, s), cap| {
        (c + cap.collected.len(), f + cap.failed.len(), s + cap.skipped.len())
    })
}

#[test]
fn two_host_fleet_with_exclusion() {
    let staging = TempDir::new().unwrap();
    let executor = Arc::new(scenario_a());
    let fleet = capture_fleet(&FleetRequest {
        coordinators: "10.0.0.1".to_string(),
        executors: "10.0.0.2".to_string(),
        template: template(Arc::clone(&executor), staging.path(), &["*.tmp"]),
        cancel: CancelToken::new(),
        notifier: None,
    })
    .unwrap();

    assert_eq!(totals(&fleet.captures), (5, 0, 1));
    assert_eq!(fleet.coordinators, vec!["10.0.0.1"]);
    assert_eq!(fleet.executors, vec!["10.0.0.2"]);
    assert_eq!(fleet.contacted(), 2);

    let root = staging.path();
    assert!(root.join("configuration/10.0.0.1-C/app.conf").is_file());
    assert!(root.join("logs/10.0.0.1-C/server.log").is_file());
    assert!(root.join("logs/10.0.0.2-E/server.log").is_file());
    assert!(!root.join("logs/10.0.0.2-E/spill.tmp").exists());

    let executor_capture = fleet.captures.iter().find(|c| c.host == "10.0.0.2").unwrap();
    assert_eq!(executor_capture.skipped, vec!["/var/log/app/spill.tmp"]);
    let server = executor_capture
        .collected
        .iter()
        .find(|f| f.path.ends_with("10.0.0.2-E/server.log"))
        .unwrap();
    assert_eq!(server.size, "executor started\n".len() as u64);
}

#[test]
fn excluded_files_are_never_copied() {
    let staging = TempDir::new().unwrap();
    let executor = Arc::new(
        FakeExecutor::new()
            .with_file("h1", "/var/log/app/heap.hprof", b"big")
            .with_file("h1", "/var/log/app/server.log", b"ok")
            .failing_copy("h1", "/var/log/app/secret.key")
            .with_file("h1", "/var/log/app/secret.key", b"k"),
    );
    let tpl = template(Arc::clone(&executor), staging.path(), &["*.hprof", "/var/log/app/secret*"]);

    let capture = capture_host(&for_host(&tpl, "h1", false), &CancelToken::new());

    assert_eq!(capture.collected.len(), 1);
    assert!(capture.failed.is_empty());
    assert_eq!(capture.skipped.len(), 2);
    let copied: Vec<String> = executor.copies().into_iter().map(|(_, src)| src).collect();
    assert_eq!(copied, vec!["/var/log/app/server.log"]);
}

#[test]
fn copy_failure_is_recorded_and_siblings_continue() {
    let staging = TempDir::new().unwrap();
    let executor = Arc::new(
        FakeExecutor::new()
            .with_file("h1", "/var/log/app/a.log", b"a")
            .with_file("h1", "/var/log/app/b.log", b"b")
            .with_file("h1", "/var/log/app/c.log", b"c")
            .failing_copy("h1", "/var/log/app/b.log"),
    );
    let tpl = template(Arc::clone(&executor), staging.path(), &[]);

    let capture = capture_host(&for_host(&tpl, "h1", true), &CancelToken::new());

    assert_eq!(capture.collected.len(), 2);
    assert_eq!(capture.failed.len(), 1);
    assert_eq!(capture.failed[0].path, "/var/log/app/b.log");
    assert!(capture.failed[0].error.contains("Input/output error"));
    assert!(capture.contacted);
}

#[test]
fn discovery_failure_empties_only_that_category() {
    let staging = TempDir::new().unwrap();
    let executor = Arc::new(
        FakeExecutor::new()
            .with_file("h1", "/opt/app/conf/app.conf", b"x")
            .with_file("h1", "/var/log/app/server.log", b"y")
            .failing_find("h1", CONF),
    );
    let tpl = template(Arc::clone(&executor), staging.path(), &[]);

    let capture = capture_host(&for_host(&tpl, "h1", false), &CancelToken::new());

    assert_eq!(capture.collected.len(), 1);
    assert!(capture.collected[0].path.ends_with("server.log"));
    assert!(capture.failed.is_empty());
}

#[test]
fn unreachable_host_is_not_contacted() {
    let staging = TempDir::new().unwrap();
    let executor = Arc::new(FakeExecutor::new().with_host("h9").unreachable("h9"));
    let tpl = template(Arc::clone(&executor), staging.path(), &[]);

    let capture = capture_host(&for_host(&tpl, "h9", false), &CancelToken::new());

    assert!(!capture.contacted);
    assert!(capture.collected.is_empty());
    assert!(capture.failed.is_empty());
}

#[test]
fn log_age_limits_discovered_logs() {
    let staging = TempDir::new().unwrap();
    let executor = Arc::new(
        FakeExecutor::new()
            .with_aged_file("h1", "/var/log/app/fresh.log", b"new", 1)
            .with_aged_file("h1", "/var/log/app/stale.log", b"old", 30),
    );
    let tpl = CaptureConfig {
        log_age_days: 7,
        ..template(Arc::clone(&executor), staging.path(), &[])
    };

    let capture = capture_host(&for_host(&tpl, "h1", false), &CancelToken::new());

    assert_eq!(capture.collected.len(), 1);
    assert!(capture.collected[0].path.ends_with("fresh.log"));
}

#[test]
fn gc_logs_follow_last_flag_and_skip_already_collected_logs() {
    let staging = TempDir::new().unwrap();
    let executor = Arc::new(
        FakeExecutor::new()
            .with_file("h1", "/var/log/app/server.log", b"log")
            .with_file("h1", "/var/log/app/gc.log", b"gc in log dir")
            .with_file("h1", "/data/gc/gc.log", b"gc")
            .with_file("h1", "/data/gc/gc.log.0", b"gc rotated")
            .with_file("h1", "/data/gc/notes.txt", b"unrelated")
            .with_startup_flags(
                "h1",
                "java -Xloggc:/var/log/app/gc.log -Xloggc:/data/gc/gc.log -jar app.jar",
            ),
    );
    let tpl = template(Arc::clone(&executor), staging.path(), &[]);

    let capture = capture_host(&for_host(&tpl, "h1", false), &CancelToken::new());

    let root = staging.path();
    assert!(root.join("gc-logs/h1-E/gc.log").is_file());
    assert!(root.join("gc-logs/h1-E/gc.log.0").is_file());
    assert!(!root.join("gc-logs/h1-E/notes.txt").exists());
    assert_eq!(capture.collected.len(), 4);
}

#[test]
fn gc_log_already_in_log_dir_is_copied_once() {
    let staging = TempDir::new().unwrap();
    let executor = Arc::new(
        FakeExecutor::new()
            .with_file("h1", "/var/log/app/gc.log", b"gc")
            .with_startup_flags("h1", "java -Xlog:gc*:file=/var/log/app/gc.log:time"),
    );
    let tpl = template(Arc::clone(&executor), staging.path(), &[]);

    let capture = capture_host(&for_host(&tpl, "h1", false), &CancelToken::new());

    assert_eq!(capture.collected.len(), 1);
    assert_eq!(executor.copies().len(), 1);
    assert!(!staging.path().join("gc-logs").exists());
}

#[test]
fn shared_log_tree_is_filed_under_each_node() {
    let staging = TempDir::new().unwrap();
    let executor = Arc::new(
        FakeExecutor::new()
            .with_file("gateway", "/var/log/app/executor/node7/server.log", b"7")
            .with_file("gateway", "/var/log/app/executor/node8/server.log", b"8")
            .with_file("gateway", "/var/log/app/server.log", b"gw"),
    );
    let tpl = template(Arc::clone(&executor), staging.path(), &[]);

    let capture = capture_host(&for_host(&tpl, "gateway", true), &CancelToken::new());

    let root = staging.path();
    assert_eq!(capture.collected.len(), 3);
    assert!(root.join("logs/node7-E/server.log").is_file());
    assert!(root.join("logs/node8-E/server.log").is_file());
    assert!(root.join("logs/gateway-C/server.log").is_file());
}

#[test]
fn cancelled_capture_copies_nothing() {
    let staging = TempDir::new().unwrap();
    let executor = Arc::new(FakeExecutor::new().with_file("h1", "/var/log/app/a.log", b"a"));
    let tpl = template(Arc::clone(&executor), staging.path(), &[]);
    let cancel = CancelToken::new();
    cancel.cancel();

    let capture = capture_host(&for_host(&tpl, "h1", false), &cancel);

    assert!(capture.collected.is_empty());
    assert!(executor.copies().is_empty());
}

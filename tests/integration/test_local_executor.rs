//! Integration tests for the local transport

use diagcap::Error;
use diagcap::remote::{LocalExecutor, RemoteExecutor};
use diagcap::services::shutdown::CancelToken;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn args(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| (*w).to_string()).collect()
}

#[cfg(unix)]
#[test]
fn command_output_is_returned() {
    let executor = LocalExecutor::new();
    let out = executor
        .execute("localhost", true, &args(&["echo", "hello"]), &CancelToken::new())
        .unwrap();
    assert_eq!(out.trim(), "hello");
}

#[cfg(unix)]
#[test]
fn failing_command_is_a_remote_error() {
    let executor = LocalExecutor::new();
    let err = executor
        .execute("localhost", false, &args(&["false"]), &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, Error::Remote { ref host, .. } if host == "localhost"));
}

#[cfg(unix)]
#[test]
fn cancelling_kills_and_reaps_running_command() {
    let executor = LocalExecutor::new();
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        trigger.cancel();
    });

    let started = Instant::now();
    let result = executor.execute("localhost", false, &args(&["sleep", "30"]), &cancel);
    canceller.join().unwrap();

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn copy_creates_destination_directories() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("server.log");
    std::fs::write(&source, b"line\n").unwrap();
    let dest = temp.path().join("staging/logs/localhost-C/server.log");

    LocalExecutor::new()
        .copy_from_host(
            "localhost",
            true,
            &source.to_string_lossy(),
            &dest,
            &CancelToken::new(),
        )
        .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), b"line\n");
}

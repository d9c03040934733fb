//! Unit tests for the query log reader

use crate::fixtures::{query_line, write_file_sync};
use chrono::{TimeZone, Utc};
use diagcap::models::CapturedFile;
use diagcap::services::queries::{is_query_log, parse_query_lines, read_captured_query_logs, read_query_log};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::{Cursor, Write};
use tempfile::TempDir;

#[test]
fn malformed_lines_are_counted_and_skipped() {
    let input = [
        query_line("q1", "COMPLETED", 100, 5, 1.5, 1_000),
        "not json".to_string(),
        String::new(),
        r#"{"queryId":"","runningTime":5}"#.to_string(),
        query_line("q2", "FAILED", 10, 1, 0.0, 2_000),
    ]
    .join("\n");

    let log = parse_query_lines(Cursor::new(input), None).unwrap();
    let ids: Vec<_> = log.records.iter().map(|r| r.query_id.as_str()).collect();
    assert_eq!(ids, vec!["q1", "q2"]);
    assert_eq!(log.malformed, 2);
    assert!(log.records[1].is_failed());
}

#[test]
fn missing_fields_take_defaults() {
    let log = parse_query_lines(Cursor::new(r#"{"queryId":"only-id"}"#), None).unwrap();
    assert_eq!(log.records.len(), 1);
    assert_eq!(log.records[0].running_time, 0);
    assert!(!log.records[0].is_failed());
}

#[test]
fn cutoff_drops_older_records() {
    let cutoff = Utc.timestamp_millis_opt(5_000).unwrap();
    let input = [
        query_line("old", "COMPLETED", 1, 1, 1.0, 4_999),
        query_line("edge", "COMPLETED", 1, 1, 1.0, 5_000),
        query_line("new", "COMPLETED", 1, 1, 1.0, 9_000),
    ]
    .join("\n");

    let log = parse_query_lines(Cursor::new(input), Some(cutoff)).unwrap();
    assert_eq!(log.records.len(), 2);
    assert_eq!(log.too_old, 1);
}

#[test]
fn reads_plain_and_gzipped_logs() {
    let temp = TempDir::new().unwrap();
    let plain = temp.path().join("queries.json");
    write_file_sync(&plain, query_line("p1", "COMPLETED", 1, 1, 1.0, 0).as_bytes()).unwrap();

    let gz = temp.path().join("queries.2024-01-01.json.gz");
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(query_line("g1", "FAILED", 1, 1, 1.0, 0).as_bytes())
        .unwrap();
    write_file_sync(&gz, &encoder.finish().unwrap()).unwrap();

    assert_eq!(read_query_log(&gz, None).unwrap().records[0].query_id, "g1");

    let other = temp.path().join("server.log");
    write_file_sync(&other, b"not a query log").unwrap();
    let files: Vec<CapturedFile> = [&plain, &gz, &other]
        .iter()
        .map(|p| CapturedFile {
            path: p.to_string_lossy().into_owned(),
            size: 0,
        })
        .collect();
    let log = read_captured_query_logs(&files, None);
    assert_eq!(log.records.len(), 2);
    assert_eq!(log.malformed, 0);
}

#[test]
fn recognises_query_log_names() {
    assert!(is_query_log("/stage/logs/10.0.0.1-C/queries.json"));
    assert!(is_query_log("queries.json.gz"));
    assert!(is_query_log("/x/queries.2024-01-01.json.gz"));
    assert!(!is_query_log("/x/server.json"));
    assert!(!is_query_log("/queries/server.log"));
}

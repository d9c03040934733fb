//! Historical query log reader.
//!
//! Coordinators write one JSON object per executed query to `queries.json`
//! (rotated copies are gzip-compressed). Lines that fail to parse are skipped
//! and counted; they never fail the read.

use crate::Result;
use crate::models::{CapturedFile, QueryRecord};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Records parsed from one or more query logs.
#[derive(Debug, Default, Clone)]
pub struct QueryLog {
    pub records: Vec<QueryRecord>,
    /// Lines that were not valid query records.
    pub malformed: usize,
    /// Records dropped by the age cutoff.
    pub too_old: usize,
}

impl QueryLog {
    fn merge(&mut self, other: QueryLog) {
        self.records.extend(other.records);
        self.malformed += other.malformed;
        self.too_old += other.too_old;
    }
}

/// True for captured files that look like query logs
/// (`queries.json`, `queries.json.gz`, `queries.2024-01-01.json.gz`, ...).
#[must_use]
pub fn is_query_log(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.starts_with("queries") && name.contains(".json")
}

/// Parse every query log among `files`. Unreadable files are logged and skipped.
#[must_use]
pub fn read_captured_query_logs(files: &[CapturedFile], cutoff: Option<DateTime<Utc>>) -> QueryLog {
    let mut log = QueryLog::default();
    for file in files.iter().filter(|f| is_query_log(&f.path)) {
        match read_query_log(Path::new(&file.path), cutoff) {
            Ok(parsed) => log.merge(parsed),
            Err(err) => log::warn!("Unable to read query log {}: {err}", file.path),
        }
    }
    if log.malformed > 0 {
        log::warn!("Skipped {} malformed query log lines", log.malformed);
    }
    log
}

/// Parse a single query log, plain or gzip-compressed.
pub fn read_query_log(path: &Path, cutoff: Option<DateTime<Utc>>) -> Result<QueryLog> {
    let file = File::open(path)?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    parse_query_lines(BufReader::new(reader), cutoff)
}

/// Parse JSON-lines query records from `reader`.
pub fn parse_query_lines<R: BufRead>(reader: R, cutoff: Option<DateTime<Utc>>) -> Result<QueryLog> {
    let cutoff_ms = cutoff.map(|c| c.timestamp_millis());
    let mut log = QueryLog::default();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: QueryRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(err) => {
                log::trace!("Malformed query log line: {err}");
                log.malformed += 1;
                continue;
            }
        };
        if record.query_id.is_empty() {
            log.malformed += 1;
            continue;
        }
        if cutoff_ms.is_some_and(|cutoff| record.submitted_time < cutoff) {
            log.too_old += 1;
            continue;
        }
        log.records.push(record);
    }
    Ok(log)
}

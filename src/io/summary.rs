//! JSON run summary read/write
//!
//! The summary is written into the staging root before archiving, so it
//! travels inside the archive next to the files it describes.

use crate::Result;
use crate::models::{ClusterInfo, CollectionSummary, HostCapture};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// File name of the summary inside the staging root.
pub const SUMMARY_FILE: &str = "summary.json";

/// Build the fleet-wide summary from merged per-host results.
#[must_use]
pub fn build_summary(
    started: DateTime<Utc>,
    finished: DateTime<Utc>,
    captures: &[HostCapture],
    coordinators: Vec<String>,
    executors: Vec<String>,
) -> CollectionSummary {
    let mut collected_files = Vec::new();
    let mut failed_files = Vec::new();
    let mut skipped_files = Vec::new();
    for capture in captures {
        collected_files.extend(capture.collected.iter().cloned());
        failed_files.extend(capture.failed.iter().cloned());
        skipped_files.extend(capture.skipped.iter().cloned());
    }
    let total_bytes_collected = collected_files.iter().map(|f| f.size).sum();

    #[allow(clippy::cast_precision_loss)]
    let total_runtime_seconds = (finished - started).num_milliseconds().max(0) as f64 / 1000.0;

    CollectionSummary {
        start_time_utc: started,
        end_time_utc: finished,
        total_runtime_seconds,
        cluster_info: ClusterInfo {
            total_nodes_attempted: captures.len(),
            number_nodes_contacted: captures.iter().filter(|c| c.contacted).count(),
        },
        collected_files,
        failed_files,
        skipped_files,
        total_bytes_collected,
        coordinators,
        executors,
    }
}

/// Write a summary as pretty-printed JSON.
pub fn write_summary(path: &Path, summary: &CollectionSummary) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Read a summary written by [`write_summary`].
pub fn read_summary(path: &Path) -> Result<CollectionSummary> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

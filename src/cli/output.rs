//! Console output for collection runs

use crate::RunReport;
use crate::models::{CapturedFile, ProgressEvent};
use crate::services::format::{format_duration, format_size};
use std::collections::BTreeMap;
use std::path::Path;

/// Failed files listed in full before the rest are summarised.
const MAX_LISTED_FAILURES: usize = 5;

/// One-line rendering of a progress event.
#[must_use]
pub fn format_event(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::HostsResolved {
            coordinators,
            executors,
        } => format!("Found {coordinators} coordinator(s) and {executors} executor(s)"),
        ProgressEvent::HostStarted { host, role } => format!("[{host}] capturing ({role})"),
        ProgressEvent::HostFinished {
            host,
            collected,
            failed,
            skipped,
        } => format!("[{host}] done: {collected} collected, {failed} failed, {skipped} skipped"),
        ProgressEvent::ProfilesSelected { candidates } => {
            format!("Downloading {candidates} job profile(s)")
        }
        ProgressEvent::ProfilesFinished { tried, collected } => {
            format!("Job profiles: {collected}/{tried} downloaded")
        }
        ProgressEvent::BundleExpanded { bundle, entries } => {
            format!("Expanded {bundle} ({entries} files)")
        }
        ProgressEvent::ArchiveWritten { path, entries } => {
            format!("Wrote {path} ({entries} entries)")
        }
        ProgressEvent::CleanupStep { index, total, name } => format!("{index}/{total}. {name}"),
    }
}

/// Sum collected bytes per top-level staging category
/// (`configuration`, `logs`, `gc-logs`, `job-profiles`, ...).
#[must_use]
pub fn bytes_by_category(staging: &Path, files: &[CapturedFile]) -> BTreeMap<String, u64> {
    let base = staging.to_string_lossy();
    let base = base.trim_end_matches('/');
    let mut totals = BTreeMap::new();
    for file in files {
        let category = file
            .path
            .strip_prefix(base)
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|rest| rest.split('/').next())
            .filter(|segment| !segment.is_empty())
            .unwrap_or("other");
        *totals.entry(category.to_string()).or_insert(0) += file.size;
    }
    totals
}

/// Print the end-of-run report.
pub fn print_report(report: &RunReport) {
    let summary = &report.summary;
    let cluster = &summary.cluster_info;

    println!();
    println!(
        "Collected {} files ({}) from {}/{} hosts in {}",
        summary.collected_files.len(),
        format_size(summary.total_bytes_collected),
        cluster.number_nodes_contacted,
        cluster.total_nodes_attempted,
        format_duration(summary.total_runtime_seconds)
    );
    for (category, bytes) in bytes_by_category(&report.staging_dir, &summary.collected_files) {
        println!("  {category:<14} {:>10}", format_size(bytes));
    }
    if report.profiles.tried > 0 {
        println!(
            "Job profiles: {}/{} downloaded",
            report.profiles.collected, report.profiles.tried
        );
    }
    if !summary.skipped_files.is_empty() {
        println!("Skipped (excluded): {}", summary.skipped_files.len());
    }

    if !summary.failed_files.is_empty() {
        println!();
        println!("Failed files: {}", summary.failed_files.len());
        for failed in summary.failed_files.iter().take(MAX_LISTED_FAILURES) {
            eprintln!("  {}: {}", failed.path, failed.error);
        }
        if summary.failed_files.len() > MAX_LISTED_FAILURES {
            eprintln!(
                "  ... and {} more",
                summary.failed_files.len() - MAX_LISTED_FAILURES
            );
        }
    }

    println!();
    println!(
        "Archive: {} ({} entries)",
        report.archive.display(),
        report.archive_entries
    );
}

//! Diagnostic collection library
//!
//! Gathers configuration, logs, GC logs and job profiles from a cluster's
//! coordinators and executors and packages them, with a JSON run summary,
//! into one portable archive.

pub mod cli;
pub mod config;
pub mod io;
pub mod models;
pub mod remote;
pub mod services;

pub use config::CollectConfig;
pub use models::{CapturedFile, CollectionSummary, FailedFile, ProgressEvent};

use crate::io::archive;
use crate::io::fs::{FileSystem, RealFileSystem};
use crate::io::summary::{SUMMARY_FILE, build_summary, write_summary};
use crate::remote::{LocalExecutor, RemoteExecutor};
use crate::services::capture::{CaptureConfig, HostScopedStrategy, compile_excludes};
use crate::services::fleet::{FleetRequest, capture_fleet, expand_bundles};
use crate::services::profiles::{
    PROFILE_DIR, ProfileBudget, ProfileDownloader, ProfileOutcome, ProfileRequest,
    RestProfileDownloader, collect_job_profiles,
};
use crate::services::queries::read_captured_query_logs;
use crate::services::shutdown::CancelToken;
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("no hosts matched selector '{selector}'")]
    NoHosts { selector: String },

    #[error("[{host}] {message}")]
    Remote { host: String, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("archive entry escapes destination: {0}")]
    PathTraversal(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("System error: {0}")]
    System(String),

    #[error("worker pool was not started")]
    PoolNotStarted,

    #[error("worker pool has no submitted jobs")]
    PoolEmpty,

    #[error("worker pool is closed")]
    PoolClosed,

    #[error("worker pool queue is full (capacity {0})")]
    QueueFull(usize),

    #[error("cleanup registration closed: {0} band is draining")]
    RegistrationClosed(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Receives progress events for console display.
pub type ProgressNotifier = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Configuration plus the capabilities a run talks through.
pub struct CollectOptions {
    pub config: CollectConfig,
    pub executor: Arc<dyn RemoteExecutor>,
    pub fs: Arc<dyn FileSystem>,
    pub downloader: Arc<dyn ProfileDownloader>,
    pub cancel: CancelToken,
    pub notifier: Option<ProgressNotifier>,
}

impl CollectOptions {
    /// Wire production capabilities for `config`.
    pub fn new(config: CollectConfig) -> Result<Self> {
        let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
        let executor: Arc<dyn RemoteExecutor> = match config.transport.as_str() {
            "local" => Arc::new(LocalExecutor::new()),
            other => {
                return Err(Error::InvalidInput(format!("unsupported transport '{other}'")));
            }
        };
        let downloader = Arc::new(RestProfileDownloader::new(
            &config.url,
            config.token.clone(),
            Arc::clone(&fs),
            config.download_timeout,
        )?);
        Ok(Self {
            config,
            executor,
            fs,
            downloader,
            cancel: CancelToken::new(),
            notifier: None,
        })
    }

    fn notify(&self, event: ProgressEvent) {
        if let Some(notifier) = &self.notifier {
            notifier(&event);
        }
    }
}

/// What a finished run produced.
#[derive(Debug)]
pub struct RunReport {
    pub summary: CollectionSummary,
    pub archive: PathBuf,
    pub archive_entries: usize,
    pub staging_dir: PathBuf,
    pub profiles: ProfileOutcome,
}

impl RunReport {
    /// True when some files or hosts could not be collected.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.summary.failed_files.is_empty()
            || self.summary.cluster_info.number_nodes_contacted
                < self.summary.cluster_info.total_nodes_attempted
    }
}

/// Run a complete collection: fleet capture, job profiles, bundle expansion,
/// summary and archive.
///
/// Only host resolution and archive construction failures abort the run;
/// per-host and per-file problems end up in the summary.
pub fn collect(opts: &CollectOptions) -> Result<RunReport> {
    let cfg = &opts.config;
    cfg.validate()?;

    let started = Utc::now();
    let staging = cfg.staging_root(started);
    opts.fs.create_dir_all(&staging)?;
    log::info!("Staging files in {}", staging.display());

    let template = CaptureConfig {
        host: String::new(),
        is_coordinator: false,
        conf_dir: cfg.conf_dir.clone(),
        log_dir: cfg.log_dir.clone(),
        gc_log_dir: cfg.gc_log_dir.clone(),
        log_age_days: cfg.log_age_days,
        excludes: compile_excludes(&cfg.excludes)?,
        max_depth: cfg.find_depth,
        jvm_process: cfg.jvm_process.clone(),
        strategy: Arc::new(HostScopedStrategy::new(&staging)),
        executor: Arc::clone(&opts.executor),
        fs: Arc::clone(&opts.fs),
    };
    let fleet = capture_fleet(&FleetRequest {
        coordinators: cfg.coordinators.clone(),
        executors: cfg.executors.clone(),
        template,
        cancel: opts.cancel.clone(),
        notifier: opts.notifier.clone(),
    })?;
    opts.cancel.check()?;

    let mut collected = fleet.collected();
    let queries = read_captured_query_logs(&collected, cfg.queries_cutoff(started));
    let profiles = collect_job_profiles(&ProfileRequest {
        records: &queries.records,
        budget: ProfileBudget::resolve(cfg.job_profiles, cfg.budget_overrides),
        dest_dir: staging.join(PROFILE_DIR),
        workers: cfg.profile_workers,
        downloader: Arc::clone(&opts.downloader),
        fs: Arc::clone(&opts.fs),
        cancel: opts.cancel.clone(),
        notifier: opts.notifier.clone(),
    })?;
    opts.cancel.check()?;

    for path in &profiles.files {
        match opts.fs.stat(path) {
            Ok(size) => collected.push(CapturedFile {
                path: path.to_string_lossy().into_owned(),
                size,
            }),
            Err(err) => log::warn!("Downloaded profile {} vanished: {err}", path.display()),
        }
    }

    let bundles = expand_bundles(&staging, opts.notifier.as_ref())?;
    let removed: HashSet<&str> = bundles.removed.iter().map(String::as_str).collect();
    collected.retain(|f| !removed.contains(f.path.as_str()));
    collected.extend(bundles.expanded.iter().cloned());

    let finished = Utc::now();
    let mut summary = build_summary(
        started,
        finished,
        &fleet.captures,
        fleet.coordinators.clone(),
        fleet.executors.clone(),
    );
    summary.failed_files.extend(bundles.failed.iter().cloned());
    collected.sort_by(|a, b| a.path.cmp(&b.path));
    summary.total_bytes_collected = collected.iter().map(|f| f.size).sum();
    summary.collected_files.clone_from(&collected);

    let summary_path = staging.join(SUMMARY_FILE);
    write_summary(&summary_path, &summary)?;
    let mut to_archive = collected;
    to_archive.push(CapturedFile {
        path: summary_path.to_string_lossy().into_owned(),
        size: opts.fs.stat(&summary_path)?,
    });

    let archive_entries = archive::write_archive(&cfg.output, &staging, &to_archive)?;
    opts.notify(ProgressEvent::ArchiveWritten {
        path: cfg.output.to_string_lossy().into_owned(),
        entries: archive_entries,
    });

    Ok(RunReport {
        summary,
        archive: cfg.output.clone(),
        archive_entries,
        staging_dir: staging,
        profiles,
    })
}

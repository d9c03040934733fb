//! Per-host capture engine.
//!
//! For one host: discover configuration, log and GC-log files through the
//! [`RemoteExecutor`], drop anything matching an exclusion glob, copy the
//! rest into the staging tree and classify every attempt as collected,
//! failed or skipped. Discovery failures empty the affected category; copy
//! failures are recorded per file. Nothing here aborts the host.

pub mod gclog;
pub mod strategy;

pub use gclog::GcLogLocation;
pub use strategy::{CopyStrategy, FileCategory, FileTarget, HostScopedStrategy, resolve_target};

use crate::io::fs::FileSystem;
use crate::models::{CapturedFile, FailedFile, HostCapture, NodeRole};
use crate::remote::{RemoteExecutor, find_command, output_lines};
use crate::services::shutdown::CancelToken;
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// Default depth bound for file discovery.
pub const DEFAULT_FIND_DEPTH: u32 = 4;

/// Everything needed to capture a single host. Built once per host and never
/// mutated; clones share the underlying capabilities.
#[derive(Clone)]
pub struct CaptureConfig {
    pub host: String,
    pub is_coordinator: bool,
    pub conf_dir: String,
    pub log_dir: String,
    /// Explicit GC log directory; when unset the JVM flags are inspected.
    pub gc_log_dir: Option<String>,
    /// Only collect logs modified within this many days (0 = all).
    pub log_age_days: u32,
    pub excludes: Vec<glob::Pattern>,
    pub max_depth: u32,
    /// Process name whose startup flags name the GC log.
    pub jvm_process: String,
    pub strategy: Arc<dyn CopyStrategy>,
    pub executor: Arc<dyn RemoteExecutor>,
    pub fs: Arc<dyn FileSystem>,
}

impl CaptureConfig {
    #[must_use]
    pub fn role(&self) -> NodeRole {
        NodeRole::from_coordinator_flag(self.is_coordinator)
    }

    /// True when `path` (or its base name) matches an exclusion glob.
    #[must_use]
    pub fn is_excluded(&self, path: &str) -> bool {
        let name = strategy::file_name(path);
        self.excludes
            .iter()
            .any(|pattern| pattern.matches(name) || pattern.matches(path))
    }
}

impl std::fmt::Debug for CaptureConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureConfig")
            .field("host", &self.host)
            .field("is_coordinator", &self.is_coordinator)
            .field("conf_dir", &self.conf_dir)
            .field("log_dir", &self.log_dir)
            .field("gc_log_dir", &self.gc_log_dir)
            .field("log_age_days", &self.log_age_days)
            .field("excludes", &self.excludes)
            .field("executor", &self.executor.name())
            .finish_non_exhaustive()
    }
}

/// Parse exclusion globs, rejecting invalid patterns.
pub fn compile_excludes(patterns: &[String]) -> Result<Vec<glob::Pattern>> {
    patterns
        .iter()
        .map(|raw| {
            glob::Pattern::new(raw)
                .map_err(|err| Error::InvalidInput(format!("invalid exclude pattern '{raw}': {err}")))
        })
        .collect()
}

/// Capture configuration, logs and GC logs from one host.
#[must_use]
pub fn capture_host(cfg: &CaptureConfig, cancel: &CancelToken) -> HostCapture {
    let mut ctx = CaptureContext::new(cfg, cancel);

    let conf_files = ctx.discover(&cfg.conf_dir, 0, FileCategory::Config);
    ctx.copy_all(&cfg.conf_dir, &conf_files, FileCategory::Config);

    let log_files = ctx.discover(&cfg.log_dir, cfg.log_age_days, FileCategory::Logs);
    ctx.copy_all(&cfg.log_dir, &log_files, FileCategory::Logs);

    if let Some(location) = ctx.gc_location() {
        let already: HashSet<&str> = log_files.iter().map(String::as_str).collect();
        let gc_files: Vec<String> = ctx
            .discover(&location.dir, 0, FileCategory::GcLogs)
            .into_iter()
            .filter(|path| matches_gc_pattern(&location, path))
            .filter(|path| !already.contains(path.as_str()))
            .collect();
        ctx.copy_all(&location.dir, &gc_files, FileCategory::GcLogs);
    }

    log::info!(
        "[{}] captured {} files, {} failed, {} skipped",
        cfg.host,
        ctx.result.collected.len(),
        ctx.result.failed.len(),
        ctx.result.skipped.len()
    );
    ctx.result
}

fn matches_gc_pattern(location: &GcLogLocation, path: &str) -> bool {
    match glob::Pattern::new(&location.pattern) {
        Ok(pattern) => pattern.matches(strategy::file_name(path)),
        Err(err) => {
            log::debug!("GC log pattern '{}' is invalid: {err}", location.pattern);
            false
        }
    }
}

struct CaptureContext<'a> {
    cfg: &'a CaptureConfig,
    cancel: &'a CancelToken,
    result: HostCapture,
}

impl<'a> CaptureContext<'a> {
    fn new(cfg: &'a CaptureConfig, cancel: &'a CancelToken) -> Self {
        Self {
            cfg,
            cancel,
            result: HostCapture {
                host: cfg.host.clone(),
                is_coordinator: cfg.is_coordinator,
                ..HostCapture::default()
            },
        }
    }

    fn execute(&mut self, args: &[String]) -> Result<String> {
        let out = self
            .cfg
            .executor
            .execute(&self.cfg.host, self.cfg.is_coordinator, args, self.cancel)?;
        self.result.contacted = true;
        Ok(out)
    }

    /// List files under `root`; a failed listing yields no files.
    fn discover(&mut self, root: &str, max_age_days: u32, category: FileCategory) -> Vec<String> {
        if root.is_empty() {
            return Vec::new();
        }
        let args = find_command(root, self.cfg.max_depth, max_age_days);
        match self.execute(&args) {
            Ok(out) => {
                let files = output_lines(&out);
                log::debug!(
                    "[{}] found {} {category} files under {root}",
                    self.cfg.host,
                    files.len()
                );
                files
            }
            Err(err) => {
                log::warn!(
                    "[{}] unable to list {category} files under {root}: {err}",
                    self.cfg.host
                );
                Vec::new()
            }
        }
    }

    /// Resolve where this host's JVM writes GC logs.
    fn gc_location(&mut self) -> Option<GcLogLocation> {
        if let Some(dir) = &self.cfg.gc_log_dir {
            return Some(GcLogLocation::from_override(dir));
        }

        let args: Vec<String> = ["ps", "-ww", "-o", "args=", "-C", &self.cfg.jvm_process]
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        let flags = match self.execute(&args) {
            Ok(out) => out,
            Err(err) => {
                log::warn!(
                    "[{}] unable to read startup flags, skipping GC logs: {err}",
                    self.cfg.host
                );
                return None;
            }
        };

        let location = GcLogLocation::from_flags(&flags, &self.cfg.log_dir);
        if location.is_none() {
            log::info!("[{}] no GC log directive found, skipping GC logs", self.cfg.host);
        }
        location
    }

    fn copy_all(&mut self, root: &str, files: &[String], category: FileCategory) {
        for path in files {
            if self.cancel.is_cancelled() {
                log::debug!("[{}] capture cancelled", self.cfg.host);
                return;
            }
            if self.cfg.is_excluded(path) {
                log::debug!("[{}] skipping excluded {path}", self.cfg.host);
                self.result.skipped.push(path.clone());
                continue;
            }
            match self.copy_one(root, path, category) {
                Ok(file) => self.result.collected.push(file),
                Err(err) => {
                    log::warn!("[{}] failed to copy {path}: {err}", self.cfg.host);
                    self.result.failed.push(FailedFile {
                        path: path.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }
    }

    fn copy_one(&mut self, root: &str, path: &str, category: FileCategory) -> Result<CapturedFile> {
        let target = resolve_target(path, root, &self.cfg.host, self.cfg.role());
        let destination = self
            .cfg
            .strategy
            .destination_dir(category, &target.host, target.role)
            .join(&target.relative);
        if let Some(parent) = destination.parent() {
            self.cfg.fs.create_dir_all(parent)?;
        }

        self.cfg.executor.copy_from_host(
            &self.cfg.host,
            self.cfg.is_coordinator,
            path,
            &destination,
            self.cancel,
        )?;
        self.result.contacted = true;

        let size = self.cfg.fs.stat(&destination)?;
        Ok(CapturedFile {
            path: destination.to_string_lossy().into_owned(),
            size,
        })
    }
}

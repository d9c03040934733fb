//! Collection run configuration.
//!
//! Values come from defaults, then environment variables, then command-line
//! flags. The access token is only ever read from the environment.

use crate::io::archive::ArchiveFormat;
use crate::services::capture::{DEFAULT_FIND_DEPTH, compile_excludes};
use crate::services::profiles::{BudgetOverrides, DEFAULT_PROFILE_WORKERS};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_TOKEN: &str = "DIAGCAP_TOKEN";
pub const ENV_STAGING_DIR: &str = "DIAGCAP_STAGING_DIR";
pub const ENV_URL: &str = "DIAGCAP_URL";

pub const DEFAULT_CONF_DIR: &str = "/opt/app/conf";
pub const DEFAULT_LOG_DIR: &str = "/var/log/app";
pub const DEFAULT_URL: &str = "http://localhost:9047";
pub const DEFAULT_JVM_PROCESS: &str = "java";
pub const DEFAULT_TRANSPORT: &str = "local";
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Transports this build can drive.
pub const SUPPORTED_TRANSPORTS: &[&str] = &["local"];

#[derive(Debug, Clone)]
pub struct CollectConfig {
    /// Archive to produce; its extension selects the format.
    pub output: PathBuf,
    pub coordinators: String,
    pub executors: String,
    pub conf_dir: String,
    pub log_dir: String,
    pub gc_log_dir: Option<String>,
    pub log_age_days: u32,
    pub excludes: Vec<String>,
    /// Working directory for copied files; a fresh temp directory when unset.
    pub staging_dir: Option<PathBuf>,
    pub job_profiles: usize,
    pub budget_overrides: BudgetOverrides,
    pub profile_workers: usize,
    /// Ignore query log records older than this many days (0 = all).
    pub queries_age_days: u32,
    pub url: String,
    pub token: Option<String>,
    pub jvm_process: String,
    pub transport: String,
    pub find_depth: u32,
    pub download_timeout: Duration,
    pub quiet: bool,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::new(),
            coordinators: String::new(),
            executors: String::new(),
            conf_dir: DEFAULT_CONF_DIR.to_string(),
            log_dir: DEFAULT_LOG_DIR.to_string(),
            gc_log_dir: None,
            log_age_days: 0,
            excludes: Vec::new(),
            staging_dir: None,
            job_profiles: 0,
            budget_overrides: BudgetOverrides::default(),
            profile_workers: DEFAULT_PROFILE_WORKERS,
            queries_age_days: 0,
            url: DEFAULT_URL.to_string(),
            token: None,
            jvm_process: DEFAULT_JVM_PROCESS.to_string(),
            transport: DEFAULT_TRANSPORT.to_string(),
            find_depth: DEFAULT_FIND_DEPTH,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            quiet: false,
        }
    }
}

impl CollectConfig {
    /// Apply `DIAGCAP_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup. Empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get(ENV_TOKEN) {
            self.token = Some(token);
        }
        if let Some(dir) = get(ENV_STAGING_DIR) {
            self.staging_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = get(ENV_URL) {
            self.url = url;
        }
    }

    /// Reject configurations that cannot produce a run.
    pub fn validate(&self) -> Result<()> {
        if self.output.as_os_str().is_empty() {
            return Err(Error::InvalidInput("--output is required".to_string()));
        }
        match ArchiveFormat::from_path(&self.output) {
            None => {
                return Err(Error::InvalidInput(format!(
                    "unsupported archive extension: {} (use .tar, .tar.gz, .tgz or .zip)",
                    self.output.display()
                )));
            }
            // A run always archives the summary next to the collected files.
            Some(ArchiveFormat::Gzip) => {
                return Err(Error::InvalidInput(format!(
                    "{} would be a single-file gzip; use .tar.gz or .tgz for a collection",
                    self.output.display()
                )));
            }
            Some(_) => {}
        }
        if self.coordinators.trim().is_empty() && self.executors.trim().is_empty() {
            return Err(Error::InvalidInput(
                "at least one of --coordinators or --executors is required".to_string(),
            ));
        }
        if !SUPPORTED_TRANSPORTS.contains(&self.transport.as_str()) {
            return Err(Error::InvalidInput(format!(
                "unsupported transport '{}' (supported: {})",
                self.transport,
                SUPPORTED_TRANSPORTS.join(", ")
            )));
        }
        if self.profile_workers == 0 {
            return Err(Error::InvalidInput(
                "--profile-workers must be at least 1".to_string(),
            ));
        }
        if self.find_depth == 0 {
            return Err(Error::InvalidInput("find depth must be at least 1".to_string()));
        }
        compile_excludes(&self.excludes)?;
        Ok(())
    }

    /// Staging directory for a run started at `now`.
    #[must_use]
    pub fn staging_root(&self, now: DateTime<Utc>) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!("diagcap-{}", now.format("%Y%m%dT%H%M%SZ")))
        })
    }

    /// Cutoff for query log records, if an age limit is set.
    #[must_use]
    pub fn queries_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.queries_age_days > 0)
            .then(|| now - chrono::Duration::days(i64::from(self.queries_age_days)))
    }
}

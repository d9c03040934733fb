//! Job-profile prioritizer.
//!
//! The query log usually holds far more queries than are worth downloading.
//! Four rankings (slowest execution, slowest planning, highest cost, most
//! recent failure) each contribute their top N; the union is deduplicated by
//! query id and downloaded through a [`WorkerPool`].

use crate::io::fs::{DEFAULT_FILE_MODE, FileSystem};
use crate::models::{JobProfileCandidate, ProfileMetric, ProgressEvent, QueryRecord};
use crate::services::capture::strategy::sanitize_component;
use crate::services::pool::{UNBOUNDED_QUEUE, WorkerPool};
use crate::services::shutdown::CancelToken;
use crate::{Error, ProgressNotifier, Result};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default number of concurrent profile downloads.
pub const DEFAULT_PROFILE_WORKERS: usize = 4;

/// Staging subdirectory holding downloaded profiles.
pub const PROFILE_DIR: &str = "job-profiles";

/// Per-criterion download budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProfileBudget {
    pub slow_exec: usize,
    pub slow_planning: usize,
    pub high_cost: usize,
    pub recent_errors: usize,
}

/// Explicit per-criterion budgets that replace the derived split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BudgetOverrides {
    pub slow_exec: Option<usize>,
    pub slow_planning: Option<usize>,
    pub high_cost: Option<usize>,
    pub recent_errors: Option<usize>,
}

impl ProfileBudget {
    /// Split `total` 40/20/20/20, folding the integer-division remainder
    /// into the slow-execution bucket so the parts always sum to `total`.
    #[must_use]
    pub fn split(total: usize) -> Self {
        let fifth = total / 5;
        Self {
            slow_exec: total - 3 * fifth,
            slow_planning: fifth,
            high_cost: fifth,
            recent_errors: fifth,
        }
    }

    /// Derive the split for `total`, then apply any explicit overrides.
    #[must_use]
    pub fn resolve(total: usize, overrides: BudgetOverrides) -> Self {
        let base = Self::split(total);
        Self {
            slow_exec: overrides.slow_exec.unwrap_or(base.slow_exec),
            slow_planning: overrides.slow_planning.unwrap_or(base.slow_planning),
            high_cost: overrides.high_cost.unwrap_or(base.high_cost),
            recent_errors: overrides.recent_errors.unwrap_or(base.recent_errors),
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.slow_exec + self.slow_planning + self.high_cost + self.recent_errors
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Pick the top records per criterion and deduplicate by query id.
///
/// Ties are broken by query id so the selection is stable. When a query
/// qualifies under several criteria the first one (in the order slow
/// execution, slow planning, high cost, recent error) is kept.
#[must_use]
pub fn select_candidates(records: &[QueryRecord], budget: &ProfileBudget) -> Vec<JobProfileCandidate> {
    let mut candidates = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    let rankings: [(ProfileMetric, usize, Vec<&QueryRecord>); 4] = [
        (
            ProfileMetric::SlowExec,
            budget.slow_exec,
            top_by(records.iter(), |a, b| {
                b.running_time.cmp(&a.running_time).then_with(|| a.query_id.cmp(&b.query_id))
            }),
        ),
        (
            ProfileMetric::SlowPlanning,
            budget.slow_planning,
            top_by(records.iter(), |a, b| {
                b.total_planning_time()
                    .cmp(&a.total_planning_time())
                    .then_with(|| a.query_id.cmp(&b.query_id))
            }),
        ),
        (
            ProfileMetric::HighCost,
            budget.high_cost,
            top_by(records.iter(), |a, b| {
                b.query_cost.total_cmp(&a.query_cost).then_with(|| a.query_id.cmp(&b.query_id))
            }),
        ),
        (
            ProfileMetric::RecentError,
            budget.recent_errors,
            top_by(records.iter().filter(|r| r.is_failed()), |a, b| {
                b.submitted_time
                    .cmp(&a.submitted_time)
                    .then_with(|| a.query_id.cmp(&b.query_id))
            }),
        ),
    ];

    for (metric, limit, ranked) in rankings {
        for record in ranked.into_iter().take(limit) {
            if seen.insert(record.query_id.as_str()) {
                candidates.push(JobProfileCandidate {
                    query_id: record.query_id.clone(),
                    metric,
                });
            }
        }
    }
    candidates
}

fn top_by<'a, I, F>(records: I, cmp: F) -> Vec<&'a QueryRecord>
where
    I: Iterator<Item = &'a QueryRecord>,
    F: FnMut(&&'a QueryRecord, &&'a QueryRecord) -> Ordering,
{
    let mut ranked: Vec<&QueryRecord> = records.filter(|r| !r.query_id.is_empty()).collect();
    ranked.sort_by(cmp);
    ranked
}

/// Fetches one job profile into a local directory.
pub trait ProfileDownloader: Send + Sync {
    /// False when no access credential is configured; nothing is attempted then.
    fn has_credential(&self) -> bool;

    /// Download the profile for `query_id` into `dest_dir`, returning the file written.
    fn download(&self, query_id: &str, dest_dir: &Path, cancel: &CancelToken) -> Result<PathBuf>;
}

/// Downloads profiles from the coordinator's REST API.
pub struct RestProfileDownloader {
    client: reqwest::blocking::Client,
    base_url: String,
    token: Option<String>,
    fs: Arc<dyn FileSystem>,
}

impl RestProfileDownloader {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        fs: Arc<dyn FileSystem>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            fs,
        })
    }

    #[must_use]
    pub fn download_url(&self, query_id: &str) -> String {
        format!("{}/apiv2/support/{query_id}/download", self.base_url)
    }
}

impl ProfileDownloader for RestProfileDownloader {
    fn has_credential(&self) -> bool {
        self.token.is_some()
    }

    fn download(&self, query_id: &str, dest_dir: &Path, cancel: &CancelToken) -> Result<PathBuf> {
        cancel.check()?;
        let Some(token) = &self.token else {
            return Err(Error::Http("no access token configured".to_string()));
        };

        let response = self
            .client
            .post(self.download_url(query_id))
            .bearer_auth(token)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|e| Error::Http(format!("profile {query_id}: {e}")))?;
        let body = response
            .bytes()
            .map_err(|e| Error::Http(format!("profile {query_id}: {e}")))?;

        cancel.check()?;
        let dest = dest_dir.join(format!("{}.zip", sanitize_component(query_id)));
        self.fs.write_file(&dest, &body, DEFAULT_FILE_MODE)?;
        log::debug!("Downloaded job profile {query_id} ({} bytes)", body.len());
        Ok(dest)
    }
}

/// Counts reported by [`collect_job_profiles`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProfileOutcome {
    /// Deduplicated candidates.
    pub tried: usize,
    /// Profiles downloaded successfully.
    pub collected: usize,
    /// Files written by successful downloads, in completion order.
    pub files: Vec<PathBuf>,
}

/// Inputs for one job-profile collection pass.
pub struct ProfileRequest<'a> {
    pub records: &'a [QueryRecord],
    pub budget: ProfileBudget,
    pub dest_dir: PathBuf,
    pub workers: usize,
    pub downloader: Arc<dyn ProfileDownloader>,
    pub fs: Arc<dyn FileSystem>,
    pub cancel: CancelToken,
    pub notifier: Option<ProgressNotifier>,
}

/// Select candidates and download them on a bounded pool.
///
/// Individual download failures are logged and reduce `collected`; they are
/// never returned as errors.
pub fn collect_job_profiles(req: &ProfileRequest<'_>) -> Result<ProfileOutcome> {
    let notify = |event: ProgressEvent| {
        if let Some(notifier) = &req.notifier {
            notifier(&event);
        }
    };

    if !req.downloader.has_credential() {
        log::info!("No access token configured, skipping job profiles");
        return Ok(ProfileOutcome::default());
    }

    let candidates = select_candidates(req.records, &req.budget);
    notify(ProgressEvent::ProfilesSelected {
        candidates: candidates.len(),
    });
    if candidates.is_empty() {
        log::info!("No job profile candidates selected");
        notify(ProgressEvent::ProfilesFinished {
            tried: 0,
            collected: 0,
        });
        return Ok(ProfileOutcome::default());
    }

    req.fs.create_dir_all(&req.dest_dir)?;
    let downloaded = Arc::new(Mutex::new(Vec::with_capacity(candidates.len())));
    let pool = WorkerPool::new(PROFILE_DIR, req.workers, UNBOUNDED_QUEUE)?;
    for candidate in &candidates {
        let downloader = Arc::clone(&req.downloader);
        let downloaded = Arc::clone(&downloaded);
        let dest_dir = req.dest_dir.clone();
        let cancel = req.cancel.clone();
        let query_id = candidate.query_id.clone();
        let metric = candidate.metric;
        pool.submit(move || {
            log::trace!("Downloading job profile {query_id} ({metric})");
            let path = downloader.download(&query_id, &dest_dir, &cancel)?;
            downloaded.lock().unwrap().push(path);
            Ok(())
        })?;
    }
    pool.start()?;
    let stats = pool.wait_for_completion()?;

    let files = std::mem::take(&mut *downloaded.lock().unwrap());
    let outcome = ProfileOutcome {
        tried: candidates.len(),
        collected: stats.succeeded,
        files,
    };
    log::info!(
        "Collected {} of {} job profiles",
        outcome.collected,
        outcome.tried
    );
    notify(ProgressEvent::ProfilesFinished {
        tried: outcome.tried,
        collected: outcome.collected,
    });
    Ok(outcome)
}

//! Unit tests for job-profile candidate selection and download

use crate::fixtures::FakeDownloader;
use diagcap::ProgressNotifier;
use diagcap::io::fs::RealFileSystem;
use diagcap::models::{ProfileMetric, ProgressEvent, QueryRecord};
use diagcap::services::profiles::{
    ProfileBudget, ProfileOutcome, ProfileRequest, collect_job_profiles, select_candidates,
};
use diagcap::services::shutdown::CancelToken;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn record(id: &str, running: u64, planning: u64, cost: f64, submitted: i64, outcome: &str) -> QueryRecord {
    QueryRecord {
        query_id: id.to_string(),
        outcome: outcome.to_string(),
        query_cost: cost,
        planning_time: planning,
        execution_planning_time: 0,
        running_time: running,
        submitted_time: submitted,
    }
}

fn sample() -> Vec<QueryRecord> {
    vec![
        record("q1", 900, 10, 1.0, 100, "COMPLETED"),
        record("q2", 800, 500, 2.0, 200, "COMPLETED"),
        record("q3", 10, 400, 9000.0, 300, "COMPLETED"),
        record("q4", 20, 5, 50.0, 400, "FAILED"),
        record("q5", 30, 5, 60.0, 500, "FAILED"),
        record("q6", 700, 5, 70.0, 50, "COMPLETED"),
    ]
}

fn ids(candidates: &[diagcap::models::JobProfileCandidate]) -> Vec<&str> {
    candidates.iter().map(|c| c.query_id.as_str()).collect()
}

#[test]
fn each_criterion_contributes_its_top_records() {
    let budget = ProfileBudget {
        slow_exec: 2,
        slow_planning: 1,
        high_cost: 1,
        recent_errors: 1,
    };
    let candidates = select_candidates(&sample(), &budget);

    assert_eq!(ids(&candidates), vec!["q1", "q2", "q3", "q5"]);
    assert_eq!(candidates[0].metric, ProfileMetric::SlowExec);
    assert_eq!(candidates[3].metric, ProfileMetric::RecentError);
}

#[test]
fn query_selected_twice_is_kept_once_under_first_criterion() {
    // q2 is both the second-slowest and the slowest to plan.
    let budget = ProfileBudget {
        slow_exec: 2,
        slow_planning: 2,
        high_cost: 0,
        recent_errors: 0,
    };
    let candidates = select_candidates(&sample(), &budget);

    assert_eq!(ids(&candidates), vec!["q1", "q2", "q3"]);
    let q2 = candidates.iter().find(|c| c.query_id == "q2").unwrap();
    assert_eq!(q2.metric, ProfileMetric::SlowExec);
    let unique: HashSet<_> = candidates.iter().map(|c| &c.query_id).collect();
    assert_eq!(unique.len(), candidates.len());
}

#[test]
fn recent_errors_only_consider_failed_queries() {
    let budget = ProfileBudget {
        recent_errors: 10,
        ..ProfileBudget::default()
    };
    let candidates = select_candidates(&sample(), &budget);
    assert_eq!(ids(&candidates), vec!["q5", "q4"]);
}

#[test]
fn ties_are_broken_by_query_id() {
    let records = vec![
        record("b", 100, 0, 0.0, 0, "COMPLETED"),
        record("c", 100, 0, 0.0, 0, "COMPLETED"),
        record("a", 100, 0, 0.0, 0, "COMPLETED"),
    ];
    let budget = ProfileBudget {
        slow_exec: 2,
        ..ProfileBudget::default()
    };
    assert_eq!(ids(&select_candidates(&records, &budget)), vec!["a", "b"]);
}

#[test]
fn budget_larger_than_log_selects_everything_once() {
    let candidates = select_candidates(&sample(), &ProfileBudget::split(100));
    assert_eq!(candidates.len(), 6);
}

fn request<'a>(
    records: &'a [QueryRecord],
    budget: ProfileBudget,
    dest: &TempDir,
    downloader: Arc<FakeDownloader>,
    notifier: Option<ProgressNotifier>,
) -> ProfileRequest<'a> {
    ProfileRequest {
        records,
        budget,
        dest_dir: dest.path().join("job-profiles"),
        workers: 2,
        downloader,
        fs: Arc::new(RealFileSystem),
        cancel: CancelToken::new(),
        notifier,
    }
}

#[test]
fn no_credential_downloads_nothing() {
    let temp = TempDir::new().unwrap();
    let records = sample();
    let downloader = Arc::new(FakeDownloader::default());
    let req = request(&records, ProfileBudget::split(10), &temp, Arc::clone(&downloader), None);

    let outcome = collect_job_profiles(&req).unwrap();

    assert_eq!(outcome.tried, 0);
    assert_eq!(outcome.collected, 0);
    assert!(downloader.requested().is_empty());
    assert!(!temp.path().join("job-profiles").exists());
}

#[test]
fn failed_download_reduces_collected_count() {
    let temp = TempDir::new().unwrap();
    let records = sample();
    let downloader = Arc::new(FakeDownloader::with_credential().failing("q3"));
    let events = Arc::new(Mutex::new(Vec::new()));
    let notifier: ProgressNotifier = {
        let events = Arc::clone(&events);
        Arc::new(move |event: &ProgressEvent| events.lock().unwrap().push(event.clone()))
    };
    let budget = ProfileBudget {
        slow_exec: 3,
        slow_planning: 0,
        high_cost: 1,
        recent_errors: 0,
    };
    let req = request(&records, budget, &temp, Arc::clone(&downloader), Some(notifier));

    let outcome = collect_job_profiles(&req).unwrap();

    assert_eq!(outcome.tried, 4);
    assert_eq!(outcome.collected, 3);
    assert_eq!(outcome.files.len(), 3);
    assert!(outcome.files.iter().all(|f| f.exists()));
    assert_eq!(downloader.requested(), vec!["q1", "q2", "q3", "q6"]);
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            ProgressEvent::ProfilesSelected { candidates: 4 },
            ProgressEvent::ProfilesFinished {
                tried: 4,
                collected: 3,
            },
        ]
    );
}

#[test]
fn empty_query_log_reports_zero_candidates() {
    let temp = TempDir::new().unwrap();
    let downloader = Arc::new(FakeDownloader::with_credential());
    let req = request(&[], ProfileBudget::split(10), &temp, Arc::clone(&downloader), None);

    let outcome = collect_job_profiles(&req).unwrap();
    assert_eq!(outcome, ProfileOutcome::default());
    assert!(downloader.requested().is_empty());
}

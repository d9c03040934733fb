//! Unit tests for the bounded worker pool

use diagcap::Error;
use diagcap::services::pool::{UNBOUNDED_QUEUE, WorkerPool};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn rejects_zero_workers() {
    let err = WorkerPool::new("test", 0, 10).err().expect("zero workers must fail");
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn wait_before_start_is_an_error() {
    let pool = WorkerPool::new("test", 2, 10).unwrap();
    pool.submit(|| Ok(())).unwrap();
    assert!(matches!(pool.wait_for_completion(), Err(Error::PoolNotStarted)));
}

#[test]
fn wait_with_no_jobs_is_an_error() {
    let pool = WorkerPool::new("test", 2, 10).unwrap();
    pool.start().unwrap();
    assert!(matches!(pool.wait_for_completion(), Err(Error::PoolEmpty)));
}

#[test]
fn failing_jobs_do_not_stop_siblings() {
    let pool = WorkerPool::new("test", 3, UNBOUNDED_QUEUE).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));
    for idx in 0..12 {
        let ran = Arc::clone(&ran);
        pool.submit(move || {
            ran.fetch_add(1, Ordering::SeqCst);
            if idx % 3 == 0 {
                Err(Error::Http(format!("job {idx} failed")))
            } else {
                Ok(())
            }
        })
        .unwrap();
    }
    pool.start().unwrap();
    let stats = pool.wait_for_completion().unwrap();

    assert_eq!(ran.load(Ordering::SeqCst), 12);
    assert_eq!(stats.submitted, 12);
    assert_eq!(stats.failed, 4);
    assert_eq!(stats.succeeded, 8);
}

#[test]
fn panicking_job_is_counted_as_failure() {
    let pool = WorkerPool::new("test", 1, 10).unwrap();
    pool.submit(|| panic!("boom")).unwrap();
    pool.submit(|| Ok(())).unwrap();
    pool.start().unwrap();
    let stats = pool.wait_for_completion().unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.succeeded, 1);
}

#[test]
fn queue_capacity_is_enforced_before_start() {
    let pool = WorkerPool::new("test", 1, 2).unwrap();
    pool.submit(|| Ok(())).unwrap();
    pool.submit(|| Ok(())).unwrap();
    assert!(matches!(pool.submit(|| Ok(())), Err(Error::QueueFull(2))));
}

#[test]
fn submit_after_completion_is_rejected() {
    let pool = WorkerPool::new("test", 1, 10).unwrap();
    pool.submit(|| Ok(())).unwrap();
    pool.start().unwrap();
    pool.wait_for_completion().unwrap();
    assert!(matches!(pool.submit(|| Ok(())), Err(Error::PoolClosed)));
}

#[test]
fn jobs_submitted_after_start_also_run() {
    let pool = WorkerPool::new("test", 2, 10).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));
    pool.start().unwrap();
    for _ in 0..5 {
        let ran = Arc::clone(&ran);
        pool.submit(move || {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    }
    let stats = pool.wait_for_completion().unwrap();
    assert_eq!(stats.submitted, 5);
    assert_eq!(ran.load(Ordering::SeqCst), 5);
}

#[test]
fn concurrency_never_exceeds_worker_count() {
    let workers = 3;
    let pool = WorkerPool::new("test", workers, UNBOUNDED_QUEUE).unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    for _ in 0..20 {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        pool.submit(move || {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    }
    pool.start().unwrap();
    pool.wait_for_completion().unwrap();
    assert!(peak.load(Ordering::SeqCst) <= workers);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn every_job_runs_exactly_once(jobs in 1usize..60, workers in 1usize..8) {
        let pool = WorkerPool::new("prop", workers, UNBOUNDED_QUEUE).unwrap();
        let runs = Arc::new(Mutex::new(vec![0usize; jobs]));
        for idx in 0..jobs {
            let runs = Arc::clone(&runs);
            pool.submit(move || {
                runs.lock().unwrap()[idx] += 1;
                Ok(())
            })
            .unwrap();
        }
        pool.start().unwrap();
        let stats = pool.wait_for_completion().unwrap();

        prop_assert_eq!(stats.submitted, jobs);
        prop_assert!(runs.lock().unwrap().iter().all(|&n| n == 1));
    }
}

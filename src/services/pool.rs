//! Bounded worker pool for one-shot jobs.
//!
//! Jobs are boxed closures returning `Result<()>`. A job's error is logged
//! and counted, never propagated: siblings keep running. The pool runs on a
//! dedicated rayon thread pool sized to exactly `workers` threads; the queue
//! capacity bounds how many jobs may be pending (submitted but unfinished).
//!
//! Lifecycle: `submit`* → `start` → `submit`* → `wait_for_completion`.
//! Waiting before `start`, or with nothing submitted, is a caller bug and is
//! reported as an error.

use crate::{Error, Result};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex};

/// A unit of work executed exactly once by the pool.
pub type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Queue capacity large enough that callers never stall on backpressure.
pub const UNBOUNDED_QUEUE: usize = 10_000_000;

/// Counters reported once every job has finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct Tracker {
    submitted: usize,
    succeeded: usize,
    failed: usize,
    started: bool,
    closed: bool,
}

impl Tracker {
    fn finished(&self) -> usize {
        self.succeeded + self.failed
    }

    fn in_flight(&self) -> usize {
        self.submitted - self.finished()
    }
}

struct Shared {
    tracker: Mutex<Tracker>,
    changed: Condvar,
}

pub struct WorkerPool {
    name: String,
    workers: usize,
    capacity: usize,
    shared: Arc<Shared>,
    queued: Mutex<Vec<Job>>,
    threads: Mutex<Option<Arc<rayon::ThreadPool>>>,
}

impl WorkerPool {
    /// Create a pool with `workers` threads and room for `capacity` pending jobs.
    pub fn new(name: impl Into<String>, workers: usize, capacity: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::InvalidInput(
                "worker pool needs at least one worker".to_string(),
            ));
        }
        if capacity == 0 {
            return Err(Error::InvalidInput(
                "worker pool queue capacity must be positive".to_string(),
            ));
        }
        Ok(Self {
            name: name.into(),
            workers,
            capacity,
            shared: Arc::new(Shared {
                tracker: Mutex::new(Tracker::default()),
                changed: Condvar::new(),
            }),
            queued: Mutex::new(Vec::new()),
            threads: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Enqueue a job. Before `start` the job waits in the queue; afterwards it
    /// is dispatched immediately, blocking while the queue is full.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let job: Job = Box::new(job);
        let mut tracker = self.shared.tracker.lock().unwrap();
        if tracker.closed {
            return Err(Error::PoolClosed);
        }

        if !tracker.started {
            if tracker.submitted >= self.capacity {
                return Err(Error::QueueFull(self.capacity));
            }
            tracker.submitted += 1;
            self.queued.lock().unwrap().push(job);
            return Ok(());
        }

        while tracker.in_flight() >= self.capacity {
            tracker = self.shared.changed.wait(tracker).unwrap();
        }
        tracker.submitted += 1;
        drop(tracker);

        let threads = self.threads.lock().unwrap().clone();
        match threads {
            Some(threads) => {
                self.dispatch(&threads, job);
                Ok(())
            }
            None => Err(Error::PoolNotStarted),
        }
    }

    /// Spin up the worker threads and dispatch everything queued so far.
    /// Calling `start` on a running pool does nothing.
    pub fn start(&self) -> Result<()> {
        let threads = {
            let mut guard = self.threads.lock().unwrap();
            if guard.is_some() {
                return Ok(());
            }
            let name = self.name.clone();
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.workers)
                .thread_name(move |idx| format!("{name}-{idx}"))
                .build()
                .map_err(|err| Error::System(format!("failed to start worker pool: {err}")))?;
            let pool = Arc::new(pool);
            *guard = Some(Arc::clone(&pool));
            pool
        };

        let queued = {
            let mut tracker = self.shared.tracker.lock().unwrap();
            tracker.started = true;
            std::mem::take(&mut *self.queued.lock().unwrap())
        };

        log::debug!(
            "Pool '{}' started with {} workers, {} queued jobs",
            self.name,
            self.workers,
            queued.len()
        );
        for job in queued {
            self.dispatch(&threads, job);
        }
        Ok(())
    }

    /// Block until every submitted job has returned, then close the queue.
    pub fn wait_for_completion(&self) -> Result<PoolStats> {
        let mut tracker = self.shared.tracker.lock().unwrap();
        if !tracker.started {
            return Err(Error::PoolNotStarted);
        }
        if tracker.submitted == 0 {
            return Err(Error::PoolEmpty);
        }
        while tracker.finished() < tracker.submitted {
            tracker = self.shared.changed.wait(tracker).unwrap();
        }
        tracker.closed = true;

        let stats = PoolStats {
            submitted: tracker.submitted,
            succeeded: tracker.succeeded,
            failed: tracker.failed,
        };
        log::debug!(
            "Pool '{}' finished: {} ok, {} failed",
            self.name,
            stats.succeeded,
            stats.failed
        );
        Ok(stats)
    }

    fn dispatch(&self, threads: &rayon::ThreadPool, job: Job) {
        let shared = Arc::clone(&self.shared);
        let name = self.name.clone();
        threads.spawn(move || {
            let ok = match catch_unwind(AssertUnwindSafe(job)) {
                Ok(Ok(())) => true,
                Ok(Err(err)) => {
                    log::warn!("Pool '{name}' job failed: {err}");
                    false
                }
                Err(_) => {
                    log::error!("Pool '{name}' job panicked");
                    false
                }
            };

            let mut tracker = shared.tracker.lock().unwrap();
            if ok {
                tracker.succeeded += 1;
            } else {
                tracker.failed += 1;
            }
            drop(tracker);
            shared.changed.notify_all();
        });
    }
}

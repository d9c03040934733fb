//! Ordered cleanup on normal completion or external interrupt.
//!
//! Cleanup work is registered into three bands that drain in a fixed order:
//!
//! 1. cancel-only tasks (interrupt path only), typically cancelling the shared
//!    [`CancelToken`] so in-flight remote calls stop at their next poll;
//! 2. normal tasks, in registration order;
//! 3. final tasks, in registration order (console teardown and the like).
//!
//! A band is taken out of the registry before any of its tasks run, so a
//! second drain finds it empty and returns immediately. Registrations into a
//! band that has started draining are rejected.

use crate::models::ProgressEvent;
use crate::{Error, ProgressNotifier, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Cooperative cancellation flag shared with every blocking remote call.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Error::Cancelled` once the token has been tripped.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

type CleanupAction = Box<dyn FnOnce() -> Result<()> + Send>;

/// A named unit of cleanup work.
pub struct CleanupTask {
    pub name: String,
    action: CleanupAction,
}

impl CleanupTask {
    pub fn new<F>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Box::new(action),
        }
    }

    fn run(self) -> (String, Result<()>) {
        let CleanupTask { name, action } = self;
        (name, action())
    }
}

impl std::fmt::Debug for CleanupTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupTask")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    CancelOnly,
    Normal,
    Final,
}

impl Band {
    fn label(self) -> &'static str {
        match self {
            Band::CancelOnly => "cancel-only",
            Band::Normal => "normal",
            Band::Final => "final",
        }
    }
}

#[derive(Debug, Default)]
struct BandState {
    tasks: Vec<CleanupTask>,
    draining: bool,
}

#[derive(Debug, Default)]
struct Registry {
    cancel_only: BandState,
    normal: BandState,
    finals: BandState,
    /// Drains currently executing tasks.
    running: usize,
}

impl Registry {
    fn band_mut(&mut self, band: Band) -> &mut BandState {
        match band {
            Band::CancelOnly => &mut self.cancel_only,
            Band::Normal => &mut self.normal,
            Band::Final => &mut self.finals,
        }
    }
}

/// Lifecycle of the coordinator as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Active,
    Draining,
    Drained,
}

/// Process-wide cleanup registry.
pub struct Shutdown {
    registry: Mutex<Registry>,
    notifier: Option<ProgressNotifier>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Shutdown {
    /// Create a coordinator. The notifier receives one `CleanupStep` per task
    /// completed on the interrupt path.
    #[must_use]
    pub fn new(notifier: Option<ProgressNotifier>) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            notifier,
        }
    }

    /// Register a normal cleanup task.
    pub fn add<F>(&self, name: impl Into<String>, action: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.register(Band::Normal, CleanupTask::new(name, action))
    }

    /// Register tasks that run only when the process is interrupted.
    pub fn add_cancel_only_tasks(&self, tasks: Vec<CleanupTask>) -> Result<()> {
        for task in tasks {
            self.register(Band::CancelOnly, task)?;
        }
        Ok(())
    }

    /// Register tasks that run after every other band.
    pub fn add_final_steps(&self, tasks: Vec<CleanupTask>) -> Result<()> {
        for task in tasks {
            self.register(Band::Final, task)?;
        }
        Ok(())
    }

    fn register(&self, band: Band, task: CleanupTask) -> Result<()> {
        let mut registry = self.registry.lock().unwrap();
        let state = registry.band_mut(band);
        if state.draining {
            log::warn!(
                "Rejecting cleanup task '{}': {} band already draining",
                task.name,
                band.label()
            );
            return Err(Error::RegistrationClosed(band.label()));
        }
        state.tasks.push(task);
        Ok(())
    }

    #[must_use]
    pub fn state(&self) -> ShutdownState {
        let registry = self.registry.lock().unwrap();
        let bands = [&registry.cancel_only, &registry.normal, &registry.finals];
        if bands.iter().all(|b| !b.draining) {
            ShutdownState::Active
        } else if registry.running == 0 && registry.finals.draining {
            ShutdownState::Drained
        } else {
            ShutdownState::Draining
        }
    }

    /// Drain the normal and final bands. Calling this twice is a no-op the
    /// second time. Returns how many tasks ran.
    pub fn cleanup(&self) -> usize {
        // The cancel-only band is closed too: nothing may be cancelled after
        // the run has finished.
        let [normal, finals, skipped] =
            self.take_bands([Band::Normal, Band::Final, Band::CancelOnly]);
        if !skipped.is_empty() {
            log::debug!("Discarding {} cancel-only tasks on normal exit", skipped.len());
        }

        let total = normal.len() + finals.len();
        if total == 0 {
            return 0;
        }

        log::debug!("Running {total} cleanup tasks");
        self.set_running(true);
        run_tasks(normal.into_iter().chain(finals), total, None);
        self.set_running(false);
        total
    }

    /// Drain every band, starting with the cancel-only band, and report each
    /// finished task as `N/total. <task name>`.
    pub fn interrupt(&self) -> usize {
        let [cancel_only, normal, finals] =
            self.take_bands([Band::CancelOnly, Band::Normal, Band::Final]);

        let total = cancel_only.len() + normal.len() + finals.len();
        if total == 0 {
            return 0;
        }

        log::info!("Interrupted: running {total} cleanup tasks");
        self.set_running(true);
        run_tasks(
            cancel_only.into_iter().chain(normal).chain(finals),
            total,
            self.notifier.as_ref(),
        );
        self.set_running(false);
        total
    }

    fn set_running(&self, running: bool) {
        let mut registry = self.registry.lock().unwrap();
        if running {
            registry.running += 1;
        } else {
            registry.running = registry.running.saturating_sub(1);
        }
    }

    /// Close the given bands and take their tasks under a single lock.
    fn take_bands(&self, bands: [Band; 3]) -> [Vec<CleanupTask>; 3] {
        let mut registry = self.registry.lock().unwrap();
        bands.map(|band| {
            let state = registry.band_mut(band);
            state.draining = true;
            std::mem::take(&mut state.tasks)
        })
    }
}

fn run_tasks(
    tasks: impl Iterator<Item = CleanupTask>,
    total: usize,
    notifier: Option<&ProgressNotifier>,
) {
    for (idx, task) in tasks.enumerate() {
        let (name, result) = task.run();
        if let Err(err) = result {
            log::warn!("Cleanup task '{name}' failed: {err}");
        }
        if let Some(notifier) = notifier {
            notifier(&ProgressEvent::CleanupStep {
                index: idx + 1,
                total,
                name,
            });
        }
    }
}

/// Block SIGINT/SIGTERM for the calling thread (and every thread it spawns
/// afterwards) and wait for them on a dedicated listener thread.
///
/// When a signal arrives the listener drains `shutdown` through
/// [`Shutdown::interrupt`] and then hands the signal number to `on_signal`,
/// which normally exits the process. Must be called before any worker thread
/// is spawned so the mask is inherited.
#[cfg(unix)]
pub fn spawn_signal_listener<F>(
    shutdown: Arc<Shutdown>,
    on_signal: F,
) -> Result<std::thread::JoinHandle<()>>
where
    F: FnOnce(i32) + Send + 'static,
{
    use nix::sys::signal::{SigSet, Signal};

    let mut mask = SigSet::empty();
    mask.add(Signal::SIGINT);
    mask.add(Signal::SIGTERM);
    mask.thread_block()
        .map_err(|e| Error::System(format!("failed to block signals: {e}")))?;

    let handle = std::thread::Builder::new()
        .name("signal-listener".to_string())
        .spawn(move || match mask.wait() {
            Ok(signal) => {
                log::info!("Received {signal:?}, cancelling collection");
                shutdown.interrupt();
                on_signal(signal as i32);
            }
            Err(err) => log::error!("Signal listener failed: {err}"),
        })?;
    Ok(handle)
}

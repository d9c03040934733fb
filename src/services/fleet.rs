//! Fleet capture orchestrator.
//!
//! Resolves the coordinator and executor selectors, captures every host on
//! its own thread and merges the per-host results through one lock. Hosts
//! finish in any order; nothing downstream depends on merge order.

use crate::io::archive;
use crate::models::{CapturedFile, FailedFile, Host, HostCapture, NodeRole, ProgressEvent};
use crate::remote::RemoteExecutor;
use crate::services::capture::{CaptureConfig, capture_host};
use crate::services::shutdown::CancelToken;
use crate::{Error, ProgressNotifier, Result};
use std::path::Path;
use std::sync::Mutex;
use std::thread;

/// Resolve both selectors to hosts.
///
/// A non-empty selector that matches nothing is fatal, as is a lookup error.
/// At least one selector must be given.
pub fn resolve_hosts(
    executor: &dyn RemoteExecutor,
    coordinators: &str,
    executors: &str,
) -> Result<Vec<Host>> {
    if coordinators.trim().is_empty() && executors.trim().is_empty() {
        return Err(Error::InvalidInput(
            "at least one of --coordinators or --executors is required".to_string(),
        ));
    }

    let mut hosts = Vec::new();
    for (selector, role) in [
        (coordinators, NodeRole::Coordinator),
        (executors, NodeRole::Executor),
    ] {
        let selector = selector.trim();
        if selector.is_empty() {
            continue;
        }
        let found = executor.find_hosts(selector)?;
        if found.is_empty() {
            return Err(Error::NoHosts {
                selector: selector.to_string(),
            });
        }
        log::debug!("Selector '{selector}' resolved to {} {role}(s)", found.len());
        hosts.extend(found.into_iter().map(|id| Host::new(id, role)));
    }
    Ok(hosts)
}

/// Inputs for one fleet capture.
pub struct FleetRequest {
    pub coordinators: String,
    pub executors: String,
    /// Per-host settings; `host` and `is_coordinator` are filled in per host.
    pub template: CaptureConfig,
    pub cancel: CancelToken,
    pub notifier: Option<ProgressNotifier>,
}

/// Merged result of a fleet capture.
#[derive(Debug, Default)]
pub struct FleetCapture {
    pub coordinators: Vec<String>,
    pub executors: Vec<String>,
    pub captures: Vec<HostCapture>,
}

impl FleetCapture {
    #[must_use]
    pub fn collected(&self) -> Vec<CapturedFile> {
        self.captures
            .iter()
            .flat_map(|c| c.collected.iter().cloned())
            .collect()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.captures.iter().map(|c| c.failed.len()).sum()
    }

    #[must_use]
    pub fn contacted(&self) -> usize {
        self.captures.iter().filter(|c| c.contacted).count()
    }
}

/// Shared accumulator for host threads.
struct FleetContext<'a> {
    results: Mutex<Vec<HostCapture>>,
    notifier: Option<&'a ProgressNotifier>,
}

impl FleetContext<'_> {
    fn notify(&self, event: ProgressEvent) {
        if let Some(notifier) = self.notifier {
            notifier(&event);
        }
    }

    fn record(&self, capture: HostCapture) {
        self.notify(ProgressEvent::HostFinished {
            host: capture.host.clone(),
            collected: capture.collected.len(),
            failed: capture.failed.len(),
            skipped: capture.skipped.len(),
        });
        self.results.lock().unwrap().push(capture);
    }
}

/// Capture every resolved host concurrently and merge the results.
pub fn capture_fleet(req: &FleetRequest) -> Result<FleetCapture> {
    let hosts = resolve_hosts(req.template.executor.as_ref(), &req.coordinators, &req.executors)?;

    let ids = |role: NodeRole| -> Vec<String> {
        hosts
            .iter()
            .filter(|h| h.role == role)
            .map(|h| h.id.clone())
            .collect()
    };
    let coordinators = ids(NodeRole::Coordinator);
    let executors = ids(NodeRole::Executor);

    let ctx = FleetContext {
        results: Mutex::new(Vec::with_capacity(hosts.len())),
        notifier: req.notifier.as_ref(),
    };
    ctx.notify(ProgressEvent::HostsResolved {
        coordinators: coordinators.len(),
        executors: executors.len(),
    });
    log::info!(
        "Capturing {} coordinator(s) and {} executor(s) via {}",
        coordinators.len(),
        executors.len(),
        req.template.executor.name()
    );

    let spawn_error = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(hosts.len());
        let mut spawn_error = None;

        for host in &hosts {
            let cfg = CaptureConfig {
                host: host.id.clone(),
                is_coordinator: host.is_coordinator(),
                ..req.template.clone()
            };
            let ctx = &ctx;
            let cancel = &req.cancel;
            ctx.notify(ProgressEvent::HostStarted {
                host: host.id.clone(),
                role: host.role,
            });

            let spawned = thread::Builder::new()
                .name(format!("capture-{}", host.id))
                .spawn_scoped(scope, move || ctx.record(capture_host(&cfg, cancel)));
            match spawned {
                Ok(handle) => handles.push((host, handle)),
                Err(err) => {
                    spawn_error = Some(Error::System(format!(
                        "failed to start capture thread for {}: {err}",
                        host.id
                    )));
                    break;
                }
            }
        }

        for (host, handle) in handles {
            if handle.join().is_err() {
                log::error!("[{}] capture thread panicked", host.id);
                ctx.record(HostCapture {
                    host: host.id.clone(),
                    is_coordinator: host.is_coordinator(),
                    ..HostCapture::default()
                });
            }
        }
        spawn_error
    });
    if let Some(err) = spawn_error {
        return Err(err);
    }

    let captures = ctx.results.into_inner().unwrap();
    Ok(FleetCapture {
        coordinators,
        executors,
        captures,
    })
}

/// Outcome of expanding pre-staged bundles.
#[derive(Debug, Default)]
pub struct BundleExpansion {
    /// Files extracted from bundles.
    pub expanded: Vec<CapturedFile>,
    /// Bundles that could not be extracted.
    pub failed: Vec<FailedFile>,
    /// Bundle paths that no longer belong in the archive.
    pub removed: Vec<String>,
}

/// Extract every `.tar.gz` bundle under `root` next to itself, then delete it.
///
/// A bundle with an entry escaping its directory is rejected as a whole and
/// reported in `failed`; the remaining bundles are still processed.
pub fn expand_bundles(root: &Path, notifier: Option<&ProgressNotifier>) -> Result<BundleExpansion> {
    let pattern = format!(
        "{}/**/*.tar.gz",
        glob::Pattern::escape(&root.to_string_lossy())
    );
    // Collected up front so bundles nested inside bundles are not expanded.
    let paths: Vec<_> = glob::glob(&pattern)
        .map_err(|e| Error::InvalidInput(format!("invalid bundle pattern: {e}")))?
        .collect();

    let mut result = BundleExpansion::default();
    for entry in paths {
        let bundle = match entry {
            Ok(path) if path.is_file() => path,
            Ok(_) => continue,
            Err(err) => {
                log::warn!("Unable to inspect {}: {err}", err.path().display());
                continue;
            }
        };
        let bundle_str = bundle.to_string_lossy().into_owned();
        let dest = bundle.parent().unwrap_or(root);
        result.removed.push(bundle_str.clone());

        match archive::extract(&bundle, dest) {
            Ok(files) => {
                for file in &files {
                    let size = std::fs::metadata(file)?.len();
                    result.expanded.push(CapturedFile {
                        path: file.to_string_lossy().into_owned(),
                        size,
                    });
                }
                std::fs::remove_file(&bundle)?;
                log::info!("Expanded bundle {bundle_str} ({} files)", files.len());
                if let Some(notifier) = notifier {
                    notifier(&ProgressEvent::BundleExpanded {
                        bundle: bundle_str,
                        entries: files.len(),
                    });
                }
            }
            Err(err) => {
                log::error!("Rejected bundle {bundle_str}: {err}");
                result.failed.push(FailedFile {
                    path: bundle_str,
                    error: err.to_string(),
                });
            }
        }
    }
    Ok(result)
}

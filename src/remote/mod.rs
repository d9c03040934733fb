//! Remote execution capability.
//!
//! The capture engine talks to hosts only through [`RemoteExecutor`]; the
//! transport (local process, kubectl, ssh) is an implementation detail of the
//! backend. Every blocking call receives the run's [`CancelToken`] and is
//! expected to give up once it is cancelled.

pub mod local;

pub use local::LocalExecutor;

use crate::Result;
use crate::services::shutdown::CancelToken;
use std::path::Path;

/// Run commands on, and copy files from, named hosts.
pub trait RemoteExecutor: Send + Sync {
    /// Short transport label used in logs.
    fn name(&self) -> &'static str;

    /// Run `args` on `host` and return its stdout.
    fn execute(
        &self,
        host: &str,
        is_coordinator: bool,
        args: &[String],
        cancel: &CancelToken,
    ) -> Result<String>;

    /// Copy `source` on `host` to the local `destination` path.
    fn copy_from_host(
        &self,
        host: &str,
        is_coordinator: bool,
        source: &str,
        destination: &Path,
        cancel: &CancelToken,
    ) -> Result<String>;

    /// Resolve a host selector to concrete host identifiers.
    fn find_hosts(&self, selector: &str) -> Result<Vec<String>>;
}

/// Build the depth-bounded `find` invocation used for file discovery.
///
/// `max_age_days > 0` restricts results to files modified within that many days.
#[must_use]
pub fn find_command(root: &str, max_depth: u32, max_age_days: u32) -> Vec<String> {
    let mut args = vec![
        "find".to_string(),
        root.to_string(),
        "-maxdepth".to_string(),
        max_depth.to_string(),
        "-type".to_string(),
        "f".to_string(),
    ];
    if max_age_days > 0 {
        args.push("-mtime".to_string());
        args.push(format!("-{max_age_days}"));
    }
    args
}

/// Split command output into trimmed, non-empty lines.
#[must_use]
pub fn output_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split a comma-separated selector into host identifiers.
#[must_use]
pub fn split_selector(selector: &str) -> Vec<String> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

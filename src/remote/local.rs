//! Local transport: every "host" is served by the machine running the
//! collector. Used for single-node installs and for shared-filesystem
//! layouts where one node sees every other node's logs.

use super::{RemoteExecutor, split_selector};
use crate::services::shutdown::CancelToken;
use crate::{Error, Result};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Default, Clone)]
pub struct LocalExecutor;

impl LocalExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl RemoteExecutor for LocalExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    fn execute(
        &self,
        host: &str,
        _is_coordinator: bool,
        args: &[String],
        cancel: &CancelToken,
    ) -> Result<String> {
        cancel.check()?;
        let Some((program, rest)) = args.split_first() else {
            return Err(Error::InvalidInput("empty command".to_string()));
        };

        log::debug!("[{host}] running {}", args.join(" "));
        let mut child = Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| remote_error(host, format!("failed to start {program}: {err}")))?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = wait_cancellable(&mut child, cancel)?;
        let stdout = join_output(stdout);
        let stderr = join_output(stderr);

        if status.success() {
            Ok(stdout)
        } else {
            Err(remote_error(
                host,
                format!("{program} exited with {status}: {}", stderr.trim()),
            ))
        }
    }

    fn copy_from_host(
        &self,
        host: &str,
        _is_coordinator: bool,
        source: &str,
        destination: &Path,
        cancel: &CancelToken,
    ) -> Result<String> {
        cancel.check()?;
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = std::fs::copy(source, destination)
            .map_err(|err| remote_error(host, format!("copy {source}: {err}")))?;
        log::trace!("[{host}] copied {source} ({bytes} bytes)");
        Ok(String::new())
    }

    fn find_hosts(&self, selector: &str) -> Result<Vec<String>> {
        Ok(split_selector(selector))
    }
}

fn remote_error(host: &str, message: String) -> Error {
    Error::Remote {
        host: host.to_string(),
        message,
    }
}

/// Poll the child until it exits, killing it if the token is cancelled.
fn wait_cancellable(child: &mut Child, cancel: &CancelToken) -> Result<std::process::ExitStatus> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if cancel.is_cancelled() {
            if let Err(err) = child.kill() {
                log::warn!("Failed to kill cancelled command: {err}");
            }
            if let Err(err) = child.wait() {
                log::debug!("Failed to reap cancelled command: {err}");
            }
            return Err(Error::Cancelled);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<thread::JoinHandle<String>> {
    pipe.map(|mut reader| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            if let Err(err) = reader.read_to_end(&mut buf) {
                log::debug!("Failed reading command output: {err}");
            }
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_output(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

//! Test fixtures: an in-memory remote fleet and a fake profile downloader

#![allow(dead_code)]

use diagcap::remote::{RemoteExecutor, split_selector};
use diagcap::services::profiles::ProfileDownloader;
use diagcap::services::shutdown::CancelToken;
use diagcap::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct FakeFile {
    content: Vec<u8>,
    age_days: u32,
}

#[derive(Debug, Default)]
struct FakeHost {
    files: BTreeMap<String, FakeFile>,
    startup_flags: Option<String>,
}

/// A fleet of hosts whose files live in memory.
///
/// `find` and `ps` are simulated; `copy_from_host` writes the file's bytes to
/// the real local destination so captured sizes can be checked on disk.
#[derive(Debug, Default)]
pub struct FakeExecutor {
    hosts: HashMap<String, FakeHost>,
    selectors: HashMap<String, Vec<String>>,
    failing_copies: HashSet<(String, String)>,
    failing_finds: HashSet<(String, String)>,
    unreachable: HashSet<String>,
    copies: Mutex<Vec<(String, String)>>,
    commands: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, host: &str, path: &str, content: &[u8]) -> Self {
        self.add_file(host, path, content, 0);
        self
    }

    pub fn with_aged_file(mut self, host: &str, path: &str, content: &[u8], age_days: u32) -> Self {
        self.add_file(host, path, content, age_days);
        self
    }

    fn add_file(&mut self, host: &str, path: &str, content: &[u8], age_days: u32) {
        self.hosts.entry(host.to_string()).or_default().files.insert(
            path.to_string(),
            FakeFile {
                content: content.to_vec(),
                age_days,
            },
        );
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.hosts.entry(host.to_string()).or_default();
        self
    }

    pub fn with_startup_flags(mut self, host: &str, flags: &str) -> Self {
        self.hosts.entry(host.to_string()).or_default().startup_flags = Some(flags.to_string());
        self
    }

    /// Resolve `selector` to `hosts` instead of splitting it on commas.
    pub fn with_selector(mut self, selector: &str, hosts: &[&str]) -> Self {
        self.selectors.insert(
            selector.to_string(),
            hosts.iter().map(|h| (*h).to_string()).collect(),
        );
        self
    }

    pub fn failing_copy(mut self, host: &str, path: &str) -> Self {
        self.failing_copies.insert((host.to_string(), path.to_string()));
        self
    }

    pub fn failing_find(mut self, host: &str, root: &str) -> Self {
        self.failing_finds.insert((host.to_string(), root.to_string()));
        self
    }

    pub fn unreachable(mut self, host: &str) -> Self {
        self.unreachable.insert(host.to_string());
        self
    }

    /// `(host, source)` pairs copied so far.
    pub fn copies(&self) -> Vec<(String, String)> {
        self.copies.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<(String, Vec<String>)> {
        self.commands.lock().unwrap().clone()
    }

    fn host(&self, host: &str) -> Result<&FakeHost> {
        if self.unreachable.contains(host) {
            return Err(remote(host, "connection refused"));
        }
        self.hosts
            .get(host)
            .ok_or_else(|| remote(host, "unknown host"))
    }

    fn find(&self, host: &str, args: &[String]) -> Result<String> {
        let root = args.get(1).cloned().unwrap_or_default();
        if self.failing_finds.contains(&(host.to_string(), root.clone())) {
            return Err(remote(host, &format!("find: '{root}': Permission denied")));
        }
        let flag = |name: &str| {
            args.iter()
                .position(|a| a == name)
                .and_then(|idx| args.get(idx + 1))
                .cloned()
        };
        let max_depth: usize = flag("-maxdepth").and_then(|d| d.parse().ok()).unwrap_or(usize::MAX);
        let max_age: Option<u32> = flag("-mtime").and_then(|m| m.trim_start_matches('-').parse().ok());

        let prefix = format!("{}/", root.trim_end_matches('/'));
        let listing: Vec<&str> = self
            .host(host)?
            .files
            .iter()
            .filter(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| path[prefix.len()..].split('/').count() <= max_depth)
            .filter(|(_, file)| max_age.is_none_or(|age| file.age_days < age))
            .map(|(path, _)| path.as_str())
            .collect();
        Ok(listing.join("\n"))
    }
}

fn remote(host: &str, message: &str) -> Error {
    Error::Remote {
        host: host.to_string(),
        message: message.to_string(),
    }
}

impl RemoteExecutor for FakeExecutor {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn execute(
        &self,
        host: &str,
        _is_coordinator: bool,
        args: &[String],
        cancel: &CancelToken,
    ) -> Result<String> {
        cancel.check()?;
        self.commands
            .lock()
            .unwrap()
            .push((host.to_string(), args.to_vec()));
        match args.first().map(String::as_str) {
            Some("find") => self.find(host, args),
            Some("ps") => self
                .host(host)?
                .startup_flags
                .clone()
                .ok_or_else(|| remote(host, "process not found")),
            _ => Err(remote(host, "unsupported command")),
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
        if self
            .failing_copies
            .contains(&(host.to_string(), source.to_string()))
        {
            return Err(remote(host, &format!("cp {source}: Input/output error")));
        }
        let file = self
            .host(host)?
            .files
            .get(source)
            .ok_or_else(|| remote(host, &format!("{source}: No such file")))?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(destination, &file.content)?;
        self.copies
            .lock()
            .unwrap()
            .push((host.to_string(), source.to_string()));
        Ok(String::new())
    }

    fn find_hosts(&self, selector: &str) -> Result<Vec<String>> {
        if let Some(hosts) = self.selectors.get(selector) {
            return Ok(hosts.clone());
        }
        Ok(split_selector(selector)
            .into_iter()
            .filter(|h| self.hosts.contains_key(h))
            .collect())
    }
}

/// Records requested query ids and writes a small file per download.
#[derive(Debug, Default)]
pub struct FakeDownloader {
    pub credential: bool,
    pub failing: HashSet<String>,
    requested: Mutex<Vec<String>>,
}

impl FakeDownloader {
    pub fn with_credential() -> Self {
        Self {
            credential: true,
            ..Self::default()
        }
    }

    pub fn failing(mut self, query_id: &str) -> Self {
        self.failing.insert(query_id.to_string());
        self
    }

    pub fn requested(&self) -> Vec<String> {
        let mut ids = self.requested.lock().unwrap().clone();
        ids.sort();
        ids
    }
}

impl ProfileDownloader for FakeDownloader {
    fn has_credential(&self) -> bool {
        self.credential
    }

    fn download(&self, query_id: &str, dest_dir: &Path, _cancel: &CancelToken) -> Result<PathBuf> {
        self.requested.lock().unwrap().push(query_id.to_string());
        if self.failing.contains(query_id) {
            return Err(Error::Http(format!("profile {query_id}: 500 Internal Server Error")));
        }
        fs::create_dir_all(dest_dir)?;
        let path = dest_dir.join(format!("{query_id}.zip"));
        fs::write(&path, format!("profile {query_id}"))?;
        Ok(path)
    }
}

/// Write `content` to `path`, creating parent directories.
pub fn write_file_sync(path: impl AsRef<Path>, content: &[u8]) -> std::io::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)
}

/// Query-log line in the coordinator's JSON-lines format.
pub fn query_line(id: &str, outcome: &str, running: u64, planning: u64, cost: f64, submitted: i64) -> String {
    format!(
        r#"{{"queryId":"{id}","outcome":"{outcome}","queryCost":{cost},"planningTime":{planning},"executionPlanningTime":0,"runningTime":{running},"submittedTime":{submitted}}}"#
    )
}

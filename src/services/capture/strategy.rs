//! Destination naming and deployment-topology correction.
//!
//! Several hosts contribute files of the same category, so every destination
//! is scoped by host identity and role. In shared-filesystem layouts a single
//! coordinator exposes every node's logs under `.../<role>/<node>/...`; those
//! path segments override the role and identity the file is filed under.

use crate::models::NodeRole;
use std::path::{Path, PathBuf};

/// Kind of artifact being copied; each maps to its own staging subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileCategory {
    Config,
    Logs,
    GcLogs,
}

impl FileCategory {
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            FileCategory::Config => "configuration",
            FileCategory::Logs => "logs",
            FileCategory::GcLogs => "gc-logs",
        }
    }
}

impl std::fmt::Display for FileCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Maps `(category, host, role)` to the local directory files are copied into.
///
/// Implementations must never return the same directory for two different
/// `(host, role)` pairs.
pub trait CopyStrategy: Send + Sync {
    fn destination_dir(&self, category: FileCategory, host: &str, role: NodeRole) -> PathBuf;
}

/// `<base>/<category>/<host>-<C|E>`.
#[derive(Debug, Clone)]
pub struct HostScopedStrategy {
    base_dir: PathBuf,
}

impl HostScopedStrategy {
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

impl CopyStrategy for HostScopedStrategy {
    fn destination_dir(&self, category: FileCategory, host: &str, role: NodeRole) -> PathBuf {
        self.base_dir
            .join(category.dir_name())
            .join(format!("{}-{}", sanitize_component(host), role.suffix()))
    }
}

/// Make a host identifier safe to use as a single path component.
///
/// The mapping is injective: separators and `%` are percent-encoded, so two
/// distinct identifiers never produce the same component.
#[must_use]
pub fn sanitize_component(raw: &str) -> String {
    match raw {
        "" => return "%".to_string(),
        "." => return "%2E".to_string(),
        ".." => return "%2E%2E".to_string(),
        _ => {}
    }
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '/' | '\\' | ':' | '%' | '\0' => out.push_str(&format!("%{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Where a discovered file should be filed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTarget {
    pub host: String,
    pub role: NodeRole,
    /// Path of the file relative to its per-host destination directory.
    pub relative: PathBuf,
}

/// Resolve the identity, role and relative destination for a discovered file.
///
/// `root` is the directory the file was discovered under. When the path
/// below `root` contains a `coordinator`/`executor` segment followed by a
/// node directory, that node and role replace the caller's; the relative
/// path then starts below the node directory. Otherwise the file keeps the
/// caller's identity and its path relative to `root`.
#[must_use]
pub fn resolve_target(path: &str, root: &str, host: &str, role: NodeRole) -> FileTarget {
    let relative = relative_to_root(path, root);
    let segments: Vec<&str> = relative
        .split('/')
        .filter(|s| !matches!(*s, "" | "." | ".."))
        .collect();

    // The node segment must be a directory, so it cannot be the last segment.
    for idx in 0..segments.len().saturating_sub(2) {
        if let Some(node_role) = NodeRole::from_segment(segments[idx]) {
            let node = segments[idx + 1];
            return FileTarget {
                host: node.to_string(),
                role: node_role,
                relative: segments[idx + 2..].iter().collect(),
            };
        }
    }

    let relative: PathBuf = if segments.is_empty() {
        PathBuf::from(file_name(path))
    } else {
        segments.iter().collect()
    };
    FileTarget {
        host: host.to_string(),
        role,
        relative,
    }
}

fn relative_to_root<'a>(path: &'a str, root: &str) -> &'a str {
    let root = root.trim_end_matches('/');
    match path.strip_prefix(root) {
        Some(rest) if root.is_empty() || rest.is_empty() || rest.starts_with('/') => rest,
        _ => path,
    }
}

/// Final path component of a remote (always `/`-separated) path.
#[must_use]
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

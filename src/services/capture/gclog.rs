//! GC log location derived from a JVM's startup flags.
//!
//! Both the legacy `-Xloggc:<file>` and the unified
//! `-Xlog:<selectors>:file=<file>[:...]` directives are recognised. When the
//! command line carries several, the last one wins, matching the JVM's own
//! left-to-right flag processing. `%t`/`%p` style tokens in the file name are
//! turned into wildcards so rotated and per-pid files all match.

use regex::Regex;
use std::sync::OnceLock;

/// Directory and base-name glob for a host's GC logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcLogLocation {
    pub dir: String,
    pub pattern: String,
}

/// Pattern used when the GC log directory is supplied explicitly.
pub const OVERRIDE_PATTERN: &str = "*gc*.log*";

impl GcLogLocation {
    /// Location for an explicitly configured directory.
    #[must_use]
    pub fn from_override(dir: &str) -> Self {
        Self {
            dir: dir.trim_end_matches('/').to_string(),
            pattern: OVERRIDE_PATTERN.to_string(),
        }
    }

    /// Derive the location from JVM startup flags.
    ///
    /// Relative log file paths are resolved against `working_dir`. Returns
    /// `None` when no GC logging directive is present.
    #[must_use]
    pub fn from_flags(flags: &str, working_dir: &str) -> Option<Self> {
        let file = last_gc_log_file(flags)?;
        let file = normalize_tokens(&file);

        let (dir, base) = match file.rfind('/') {
            Some(0) => ("/".to_string(), &file[1..]),
            Some(idx) => (file[..idx].to_string(), &file[idx + 1..]),
            None => (working_dir.trim_end_matches('/').to_string(), file.as_str()),
        };
        if base.is_empty() {
            return None;
        }

        Some(Self {
            dir,
            pattern: collapse_wildcards(&format!("*{base}*")),
        })
    }
}

fn legacy_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"-Xloggc:(?:"([^"]+)"|(\S+))"#).unwrap())
}

fn unified_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"-Xlog:\S*?file=(?:"([^"]+)"|([^:\s]+))"#).unwrap())
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"%[A-Za-z]+").unwrap())
}

/// File named by the last GC logging directive in `flags`.
#[must_use]
pub fn last_gc_log_file(flags: &str) -> Option<String> {
    [legacy_regex(), unified_regex()]
        .iter()
        .flat_map(|re| re.captures_iter(flags))
        .filter_map(|caps| {
            let start = caps.get(0)?.start();
            let value = caps.get(1).or_else(|| caps.get(2))?.as_str();
            Some((start, value.to_string()))
        })
        .max_by_key(|(start, _)| *start)
        .map(|(_, file)| file)
}

fn normalize_tokens(file: &str) -> String {
    token_regex().replace_all(file, "*").into_owned()
}

fn collapse_wildcards(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if c == '*' && out.ends_with('*') {
            continue;
        }
        out.push(c);
    }
    out
}

//! Data models for hosts, captured files, query records and run summaries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role a node plays in the target cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Coordinator,
    Executor,
}

impl NodeRole {
    #[must_use]
    pub fn from_coordinator_flag(is_coordinator: bool) -> Self {
        if is_coordinator {
            NodeRole::Coordinator
        } else {
            NodeRole::Executor
        }
    }

    #[must_use]
    pub fn is_coordinator(self) -> bool {
        self == NodeRole::Coordinator
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            NodeRole::Coordinator => "coordinator",
            NodeRole::Executor => "executor",
        }
    }

    /// Single-letter suffix used in per-host staging directory names.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            NodeRole::Coordinator => "C",
            NodeRole::Executor => "E",
        }
    }

    /// Parse a path segment naming a role (`coordinator`, `executor`).
    #[must_use]
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "coordinator" => Some(NodeRole::Coordinator),
            "executor" => Some(NodeRole::Executor),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A host discovered for one collection run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Host {
    pub id: String,
    pub role: NodeRole,
}

impl Host {
    #[must_use]
    pub fn new(id: impl Into<String>, role: NodeRole) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    #[must_use]
    pub fn is_coordinator(&self) -> bool {
        self.role.is_coordinator()
    }
}

/// A file copied successfully to the local staging area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedFile {
    pub path: String,
    pub size: u64,
}

/// A file whose copy attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFile {
    pub path: String,
    pub error: String,
}

/// Outcome of capturing one host.
#[derive(Debug, Clone, Default)]
pub struct HostCapture {
    pub host: String,
    pub is_coordinator: bool,
    /// True once at least one remote command on the host succeeded.
    pub contacted: bool,
    pub collected: Vec<CapturedFile>,
    pub failed: Vec<FailedFile>,
    pub skipped: Vec<String>,
}

/// One row of the historical query log.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryRecord {
    pub query_id: String,
    pub outcome: String,
    pub query_cost: f64,
    pub planning_time: u64,
    pub execution_planning_time: u64,
    pub running_time: u64,
    /// Submission time in epoch milliseconds.
    pub submitted_time: i64,
}

impl QueryRecord {
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.outcome.eq_ignore_ascii_case("FAILED")
    }

    #[must_use]
    pub fn total_planning_time(&self) -> u64 {
        self.planning_time
            .saturating_add(self.execution_planning_time)
    }
}

/// Ranking criterion that qualified a query for job-profile download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProfileMetric {
    SlowExec,
    SlowPlanning,
    HighCost,
    RecentError,
}

impl ProfileMetric {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProfileMetric::SlowExec => "slowExec",
            ProfileMetric::SlowPlanning => "slowPlanning",
            ProfileMetric::HighCost => "highCost",
            ProfileMetric::RecentError => "recentError",
        }
    }
}

impl std::fmt::Display for ProfileMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobProfileCandidate {
    pub query_id: String,
    pub metric: ProfileMetric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    pub total_nodes_attempted: usize,
    pub number_nodes_contacted: usize,
}

/// Persisted run summary written next to the archive payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSummary {
    #[serde(rename = "startTimeUTC")]
    pub start_time_utc: DateTime<Utc>,
    #[serde(rename = "endTimeUTC")]
    pub end_time_utc: DateTime<Utc>,
    pub total_runtime_seconds: f64,
    pub cluster_info: ClusterInfo,
    pub collected_files: Vec<CapturedFile>,
    pub failed_files: Vec<FailedFile>,
    pub skipped_files: Vec<String>,
    pub total_bytes_collected: u64,
    pub coordinators: Vec<String>,
    pub executors: Vec<String>,
}

/// Progress notifications surfaced to the console layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    HostsResolved {
        coordinators: usize,
        executors: usize,
    },
    HostStarted {
        host: String,
        role: NodeRole,
    },
    HostFinished {
        host: String,
        collected: usize,
        failed: usize,
        skipped: usize,
    },
    ProfilesSelected {
        candidates: usize,
    },
    ProfilesFinished {
        tried: usize,
        collected: usize,
    },
    BundleExpanded {
        bundle: String,
        entries: usize,
    },
    ArchiveWritten {
        path: String,
        entries: usize,
    },
    CleanupStep {
        index: usize,
        total: usize,
        name: String,
    },
}

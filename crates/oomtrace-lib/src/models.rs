//! Core data models for job investigation

use crate::error::TraceError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Numeric identifier of an automation job run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// The `job-<id>` tag carried by the job's pod and container names
    pub fn tag(&self) -> String {
        format!("job-{}", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
            return Err(TraceError::InvalidJobId(s.to_string()));
        }
        trimmed
            .parse()
            .map(JobId)
            .map_err(|_| TraceError::InvalidJobId(s.to_string()))
    }
}

/// Length of a container runtime identifier in hex characters
pub const CONTAINER_ID_LEN: usize = 64;

/// 64-character lowercase hex container identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Accepts a 64-char hex token, normalizing to lowercase
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() == CONTAINER_ID_LEN && raw.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(raw.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 13 characters, as container runtimes print them
    pub fn short(&self) -> &str {
        &self.0[..13]
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a job's container ended, as far as the logs tell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    #[default]
    None,
    Eviction,
    KernelOom,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::None => f.write_str("none"),
            Classification::Eviction => f.write_str("eviction"),
            Classification::KernelOom => f.write_str("kernel_oom"),
        }
    }
}

/// Heuristic tier that produced a container ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionTier {
    /// Worker container kill record
    KillEvent,
    /// Container finished record correlated to the job's pod
    Finished,
    /// Container started record tagged with the job
    Started,
}

impl fmt::Display for ResolutionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionTier::KillEvent => f.write_str("tier1:kill-event"),
            ResolutionTier::Finished => f.write_str("tier2:finished"),
            ResolutionTier::Started => f.write_str("tier3:started"),
        }
    }
}

/// Memory figures of the OOM victim process, in kB
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VictimMemory {
    pub pid: Option<u32>,
    pub name: Option<String>,
    pub total_vm_kb: Option<u64>,
    pub anon_rss_kb: Option<u64>,
    pub file_rss_kb: Option<u64>,
    pub shmem_rss_kb: Option<u64>,
}

/// cgroup memory summary printed with the OOM report, in kB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CgroupMemory {
    pub usage_kb: u64,
    pub limit_kb: u64,
    pub failcnt: u64,
}

/// RSS of every task sharing one process name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRss {
    pub count: u32,
    pub rss_kb: u64,
}

/// Structured memory accounting for one kernel OOM report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryReport {
    pub victim: VictimMemory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cgroup: Option<CgroupMemory>,
    /// Process name -> aggregate RSS; empty when no task dump was logged
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub processes: BTreeMap<String, ProcessRss>,
}

impl MemoryReport {
    pub fn is_empty(&self) -> bool {
        self.victim == VictimMemory::default() && self.cgroup.is_none() && self.processes.is_empty()
    }

    /// Process breakdown sorted by aggregate RSS, largest first
    pub fn top_processes(&self) -> Vec<(&str, ProcessRss)> {
        let mut rows: Vec<_> = self
            .processes
            .iter()
            .map(|(name, rss)| (name.as_str(), *rss))
            .collect();
        rows.sort_by(|a, b| b.1.rss_kb.cmp(&a.1.rss_kb).then(a.0.cmp(b.0)));
        rows
    }
}

/// Outcome of investigating one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: JobId,
    /// Node name (live) or bundle hostname (offline)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<ContainerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<ResolutionTier>,
    pub classification: Classification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oom_pid: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub evidence: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryReport>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub container_log_tail: Vec<String>,
}

impl JobReport {
    pub fn not_found(job_id: JobId, location: Option<String>) -> Self {
        Self {
            job_id,
            location,
            container_id: None,
            resolved_by: None,
            classification: Classification::None,
            oom_pid: None,
            evidence: Vec::new(),
            memory: None,
            container_log_tail: Vec::new(),
        }
    }

    pub fn is_found(&self) -> bool {
        self.container_id.is_some()
    }
}

/// Process-level result of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Every requested job was found
    Success,
    /// Some but not all jobs were found
    Partial,
    /// No job was found
    Failure,
}

impl ExitStatus {
    pub fn code(&self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
            ExitStatus::Partial => 2,
        }
    }
}

/// Aggregate over one batch of jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub requested: usize,
    pub found: usize,
    pub missing: Vec<JobId>,
}

impl BatchSummary {
    pub fn from_reports(reports: &[JobReport]) -> Self {
        let missing: Vec<JobId> = reports
            .iter()
            .filter(|r| !r.is_found())
            .map(|r| r.job_id)
            .collect();
        Self {
            requested: reports.len(),
            found: reports.len() - missing.len(),
            missing,
        }
    }

    pub fn exit_status(&self) -> ExitStatus {
        if self.found == 0 {
            ExitStatus::Failure
        } else if self.found < self.requested {
            ExitStatus::Partial
        } else {
            ExitStatus::Success
        }
    }
}

/// Job IDs in input order with duplicates removed
pub fn dedup_jobs(jobs: &[JobId]) -> Vec<JobId> {
    let mut seen = std::collections::HashSet::new();
    jobs.iter().copied().filter(|j| seen.insert(*j)).collect()
}

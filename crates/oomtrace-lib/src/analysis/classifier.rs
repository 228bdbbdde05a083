//! Eviction / kernel OOM classification

use crate::models::{Classification, ContainerId, JobId};
use crate::resolve::patterns;
use serde::Serialize;

/// Evidence lines kept per classification
const MAX_EVIDENCE_LINES: usize = 10;

/// Which text an oom-kill match came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelSource {
    /// Kernel ring buffer (bundle dmesg)
    Kernel,
    /// Persisted kernel log of the whole boot
    BootKernel,
    /// Node journal, which carries kernel messages in live mode
    Journal,
}

/// Texts examined for one (job, container) pair
#[derive(Debug, Clone, Copy, Default)]
pub struct Evidence<'a> {
    pub journal: &'a str,
    pub kernel: Option<&'a str>,
    pub boot_kernel: Option<&'a str>,
}

impl<'a> Evidence<'a> {
    pub fn journal(journal: &'a str) -> Self {
        Self {
            journal,
            ..Default::default()
        }
    }

    pub fn text(&self, source: KernelSource) -> Option<&'a str> {
        match source {
            KernelSource::Kernel => self.kernel,
            KernelSource::BootKernel => self.boot_kernel,
            KernelSource::Journal => Some(self.journal),
        }
    }
}

/// Result of classifying one job's container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub classification: Classification,
    /// Victim pid from the oom-kill line
    pub pid: Option<u32>,
    /// Text holding the matched oom-kill line
    pub oom_source: Option<KernelSource>,
    pub evidence: Vec<String>,
}

/// Classify how the job's container ended
///
/// Eviction records tagged with the job take precedence over any kernel
/// oom-kill naming the container. Kernel text is searched in order: ring
/// buffer, whole-boot log, then the journal itself.
pub fn classify(job: JobId, container: &ContainerId, evidence: &Evidence<'_>) -> Verdict {
    let evictions = eviction_lines(job, evidence.journal);
    let oom = [KernelSource::Kernel, KernelSource::BootKernel, KernelSource::Journal]
        .into_iter()
        .find_map(|source| {
            let lines = oom_kill_lines(container, evidence.text(source)?);
            (!lines.is_empty()).then_some((source, lines))
        });

    if !evictions.is_empty() {
        return Verdict {
            classification: Classification::Eviction,
            pid: oom.as_ref().and_then(|(_, lines)| last_pid(lines)),
            oom_source: None,
            evidence: keep_last(&evictions),
        };
    }

    match oom {
        Some((source, lines)) => Verdict {
            classification: Classification::KernelOom,
            pid: last_pid(&lines),
            oom_source: Some(source),
            evidence: keep_last(&lines),
        },
        None => Verdict {
            classification: Classification::None,
            pid: None,
            oom_source: None,
            evidence: Vec::new(),
        },
    }
}

/// Eviction manager records tagged with the job
pub fn eviction_lines(job: JobId, journal: &str) -> Vec<&str> {
    journal
        .lines()
        .filter(|l| patterns::is_eviction(l) && patterns::has_job_tag(l, job))
        .collect()
}

/// Kernel oom-kill records whose cgroup fields name the container
pub fn oom_kill_lines<'t>(container: &ContainerId, text: &'t str) -> Vec<&'t str> {
    text.lines()
        .filter(|l| patterns::oom_kill_names_container(l, container))
        .collect()
}

fn last_pid(lines: &[&str]) -> Option<u32> {
    lines.iter().rev().find_map(|l| patterns::oom_kill_pid(l))
}

fn keep_last(lines: &[&str]) -> Vec<String> {
    let skip = lines.len().saturating_sub(MAX_EVIDENCE_LINES);
    lines[skip..].iter().map(|l| l.trim().to_string()).collect()
}

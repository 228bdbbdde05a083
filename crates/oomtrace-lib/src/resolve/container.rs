//! Job -> container ID resolution
//!
//! Applies three heuristic tiers to a node or bundle journal, highest
//! confidence first:
//! 1. kubelet killing the job's `worker` container
//! 2. PLEG "container finished" records of the job's pod
//! 3. "container started" records tagged with the job
//!
//! Tier 3 regularly yields several IDs (pod sandbox, sidecars). Those are
//! reduced by cross-referencing kernel oom-kill lines, then by a fixed
//! positional pick.

use super::patterns;
use crate::models::{ContainerId, JobId, ResolutionTier};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::debug;

/// Positional choice among candidates no oom-kill line singles out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmbiguousPick {
    First,
    /// The worker starts after the pod sandbox, so it is usually last
    #[default]
    Last,
}

/// A resolved container and how it was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub container_id: ContainerId,
    pub tier: ResolutionTier,
    /// Distinct candidates the winning tier produced
    pub candidates: usize,
}

/// Resolves the container that ran a job from journal text
#[derive(Debug, Clone, Default)]
pub struct ContainerResolver {
    pick: AmbiguousPick,
}

impl ContainerResolver {
    pub fn new(pick: AmbiguousPick) -> Self {
        Self { pick }
    }

    /// Resolve the job's container from `source`, using the `auxiliary`
    /// texts (kernel messages) only to break ties
    pub fn resolve(
        &self,
        job: JobId,
        source: &str,
        auxiliary: &[&str],
    ) -> Option<Resolution> {
        let kill = Self::kill_event_candidates(job, source);
        if kill.len() == 1 {
            return Some(Self::unique(kill, ResolutionTier::KillEvent));
        }

        let finished = Self::finished_candidates(job, source);
        if finished.len() == 1 {
            return Some(Self::unique(finished, ResolutionTier::Finished));
        }

        let started = Self::started_candidates(job, source);
        if !started.is_empty() {
            return Some(self.reduce(job, started, ResolutionTier::Started, source, auxiliary));
        }

        // Tier 3 is empty: fall back to whichever higher tier was ambiguous
        if !kill.is_empty() {
            return Some(self.reduce(job, kill, ResolutionTier::KillEvent, source, auxiliary));
        }
        if !finished.is_empty() {
            return Some(self.reduce(job, finished, ResolutionTier::Finished, source, auxiliary));
        }

        None
    }

    /// Tier 1: IDs from kill records of the job's worker container
    pub fn kill_event_candidates(job: JobId, text: &str) -> Vec<ContainerId> {
        distinct(
            text.lines()
                .filter(|l| patterns::has_job_tag(l, job) && patterns::is_worker_kill(l))
                .flat_map(patterns::container_ids),
        )
    }

    /// Tier 2: IDs from "container finished" records of the job's pod
    ///
    /// Correlates by pod UID when any job-tagged record carries one,
    /// otherwise by the job tag on the finished record itself.
    pub fn finished_candidates(job: JobId, text: &str) -> Vec<ContainerId> {
        let pod_uids: HashSet<String> = text
            .lines()
            .filter(|l| patterns::has_job_tag(l, job))
            .filter_map(patterns::pod_uid)
            .collect();

        if !pod_uids.is_empty() {
            let by_uid = distinct(
                text.lines()
                    .filter(|l| patterns::is_container_finished(l))
                    .filter(|l| pod_uids.iter().any(|uid| l.contains(uid.as_str())))
                    .flat_map(patterns::container_ids),
            );
            if !by_uid.is_empty() {
                return by_uid;
            }
        }

        distinct(
            text.lines()
                .filter(|l| patterns::is_container_finished(l) && patterns::has_job_tag(l, job))
                .flat_map(patterns::container_ids),
        )
    }

    /// Tier 3: IDs from "container started" records tagged with the job
    pub fn started_candidates(job: JobId, text: &str) -> Vec<ContainerId> {
        distinct(
            text.lines()
                .filter(|l| patterns::is_container_started(l) && patterns::has_job_tag(l, job))
                .flat_map(patterns::container_ids),
        )
    }

    /// Cheap existence check used when scanning nodes for outstanding jobs
    pub fn has_started_record(job: JobId, text: &str) -> bool {
        text.lines()
            .any(|l| patterns::is_container_started(l) && patterns::has_job_tag(l, job))
    }

    fn unique(mut candidates: Vec<ContainerId>, tier: ResolutionTier) -> Resolution {
        Resolution {
            container_id: candidates.remove(0),
            tier,
            candidates: 1,
        }
    }

    fn reduce(
        &self,
        job: JobId,
        candidates: Vec<ContainerId>,
        tier: ResolutionTier,
        source: &str,
        auxiliary: &[&str],
    ) -> Resolution {
        let count = candidates.len();
        if count == 1 {
            return Self::unique(candidates, tier);
        }

        let oom_lines: Vec<&str> = source
            .lines()
            .chain(auxiliary.iter().flat_map(|text| text.lines()))
            .filter(|l| patterns::is_oom_kill(l))
            .collect();
        let oom_matched: Vec<ContainerId> = candidates
            .iter()
            .filter(|c| oom_lines.iter().any(|l| l.contains(c.as_str())))
            .cloned()
            .collect();

        let mut pool = if oom_matched.is_empty() {
            debug!(job_id = %job, tier = %tier, candidates = count, "Ambiguous candidates, using positional pick");
            candidates
        } else {
            debug!(job_id = %job, tier = %tier, candidates = count, "Candidate selected by oom-kill cross-reference");
            oom_matched
        };

        // pool holds at least one ID here
        let index = match self.pick {
            AmbiguousPick::First => 0,
            AmbiguousPick::Last => pool.len() - 1,
        };

        Resolution {
            container_id: pool.swap_remove(index),
            tier,
            candidates: count,
        }
    }
}

fn distinct(ids: impl Iterator<Item = ContainerId>) -> Vec<ContainerId> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(c: char) -> String {
        c.to_string().repeat(64)
    }

    const POD_UID: &str = "0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0";

    fn started(job: &str, cid: &str) -> String {
        format!(
            r#"May 01 10:00:01 worker-1 kubenswrapper[2110]: I0501 10:00:01.1 2110 kubelet.go:2457] "SyncLoop (PLEG): event for pod" pod="aap/automation-{}-x7k2p" event={{"ID":"{}","Type":"ContainerStarted","Data":"{}"}}"#,
            job, POD_UID, cid
        )
    }

    fn killing(job: &str, name: &str, cid: &str) -> String {
        format!(
            r#"May 01 10:05:00 worker-1 kubenswrapper[2110]: I0501 10:05:00.1 2110 kuberuntime_container.go:709] "Killing container with a grace period" pod="aap/automation-{}-x7k2p" podUID="{}" containerName="{}" containerID="cri-o://{}" gracePeriod=30"#,
            job, POD_UID, name, cid
        )
    }

    fn finished(uid: &str, cid: &str) -> String {
        format!(
            r#"May 01 10:04:59 worker-1 kubenswrapper[2110]: I0501 10:04:59.9 2110 generic.go:334] "Generic (PLEG): container finished" podID="{}" containerID="{}" exitCode=137"#,
            uid, cid
        )
    }

    fn oom_kill(cid: &str) -> String {
        format!(
            "May 01 10:04:58 worker-1 kernel: oom-kill:constraint=CONSTRAINT_MEMCG,nodemask=(null),cpuset=crio-{cid}.scope,mems_allowed=0,oom_memcg=/kubepods.slice/crio-{cid}.scope,task_memcg=/kubepods.slice/crio-{cid}.scope,task=ansible-playboo,pid=555,uid=1000"
        )
    }

    #[test]
    fn test_tier1_kill_event_wins() {
        let log = [
            started("job-4", &id('1')),
            started("job-4", &id('2')),
            finished(POD_UID, &id('3')),
            killing("job-4", "worker", &id('a')),
        ]
        .join("\n");

        let r = ContainerResolver::default()
            .resolve(JobId::new(4), &log, &[])
            .unwrap();
        assert_eq!(r.container_id.as_str(), id('a'));
        assert_eq!(r.tier, ResolutionTier::KillEvent);
    }

    #[test]
    fn test_tier1_ignores_other_jobs_and_sidecars() {
        let log = [
            killing("job-42", "worker", &id('b')),
            killing("job-4", "sidecar", &id('c')),
        ]
        .join("\n");
        assert!(ContainerResolver::kill_event_candidates(JobId::new(4), &log).is_empty());
    }

    #[test]
    fn test_tier2_correlates_by_pod_uid() {
        let other_uid = "11111111-2222-3333-4444-555555555555";
        let log = [
            started("job-4", &id('1')),
            started("job-4", &id('2')),
            finished(other_uid, &id('e')),
            finished(POD_UID, &id('d')),
        ]
        .join("\n");

        let r = ContainerResolver::default()
            .resolve(JobId::new(4), &log, &[])
            .unwrap();
        assert_eq!(r.container_id.as_str(), id('d'));
        assert_eq!(r.tier, ResolutionTier::Finished);
    }

    #[test]
    fn test_tier2_falls_back_to_job_tag_on_record() {
        let log = format!(
            r#"I0501 generic.go:334] "Generic (PLEG): container finished" pod="aap/automation-job-4-x" containerID="{}" exitCode=137"#,
            id('a')
        );
        let r = ContainerResolver::default()
            .resolve(JobId::new(4), &log, &[])
            .unwrap();
        assert_eq!(r.container_id.as_str(), id('a'));
        assert_eq!(r.tier, ResolutionTier::Finished);
    }

    #[test]
    fn test_tier3_single_candidate() {
        let log = [started("job-4", &id('5')), started("job-9", &id('6'))].join("\n");
        let r = ContainerResolver::default()
            .resolve(JobId::new(4), &log, &[])
            .unwrap();
        assert_eq!(r.container_id.as_str(), id('5'));
        assert_eq!(r.tier, ResolutionTier::Started);
        assert_eq!(r.candidates, 1);
    }

    #[test]
    fn test_tier3_oom_cross_reference_beats_position() {
        let log = [
            started("job-4", &id('1')),
            started("job-4", &id('2')),
            started("job-4", &id('3')),
        ]
        .join("\n");
        let kernel = oom_kill(&id('2'));

        for pick in [AmbiguousPick::First, AmbiguousPick::Last] {
            let r = ContainerResolver::new(pick)
                .resolve(JobId::new(4), &log, &[kernel.as_str()])
                .unwrap();
            assert_eq!(r.container_id.as_str(), id('2'));
            assert_eq!(r.candidates, 3);
        }
    }

    #[test]
    fn test_oom_cross_reference_reads_every_auxiliary_text() {
        let log = [started("job-4", &id('1')), started("job-4", &id('2'))].join("\n");
        let boot = oom_kill(&id('1'));
        let r = ContainerResolver::new(AmbiguousPick::Last)
            .resolve(JobId::new(4), &log, &["[5.0] rotated ring buffer", boot.as_str()])
            .unwrap();
        assert_eq!(r.container_id.as_str(), id('1'));
    }

    #[test]
    fn test_tier3_positional_fallback_is_approximate() {
        // No oom-kill line: the winner is only a positional guess
        let log = [started("job-4", &id('1')), started("job-4", &id('2'))].join("\n");
        let first = ContainerResolver::new(AmbiguousPick::First)
            .resolve(JobId::new(4), &log, &[])
            .unwrap();
        let last = ContainerResolver::new(AmbiguousPick::Last)
            .resolve(JobId::new(4), &log, &[])
            .unwrap();
        assert_eq!(first.candidates, 2);
        assert!([id('1'), id('2')].contains(&first.container_id.to_string()));
        assert!([id('1'), id('2')].contains(&last.container_id.to_string()));
    }

    #[test]
    fn test_ambiguous_tier1_used_when_tier3_empty() {
        let log = [
            killing("job-4", "worker", &id('7')),
            killing("job-4", "worker", &id('8')),
        ]
        .join("\n");
        let kernel = oom_kill(&id('7'));
        let r = ContainerResolver::new(AmbiguousPick::Last)
            .resolve(JobId::new(4), &log, &[kernel.as_str()])
            .unwrap();
        assert_eq!(r.container_id.as_str(), id('7'));
        assert_eq!(r.tier, ResolutionTier::KillEvent);
    }

    #[test]
    fn test_not_found() {
        let log = [started("job-40", &id('1')), killing("job-5", "worker", &id('2'))].join("\n");
        assert_eq!(ContainerResolver::default().resolve(JobId::new(4), &log, &[]), None);
        assert!(!ContainerResolver::has_started_record(JobId::new(4), &log));
        assert!(ContainerResolver::has_started_record(JobId::new(40), &log));
    }
}

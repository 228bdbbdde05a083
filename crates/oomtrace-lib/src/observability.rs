//! Structured logging for investigation runs
//!
//! Every significant step of a run is emitted as a `tracing` event with an
//! `event` field and consistent job/source fields, so `--log-json` output
//! can be filtered per job.

use crate::models::{BatchSummary, Classification, ContainerId, JobId, ResolutionTier};
use crate::resolve::LocateMethod;
use tracing::{debug, info, warn};

/// Structured logger for investigation events
#[derive(Debug, Clone)]
pub struct InvestigationLogger {
    mode: String,
}

impl InvestigationLogger {
    pub fn new(mode: impl Into<String>) -> Self {
        Self { mode: mode.into() }
    }

    /// Log the start of a run
    pub fn log_run_started(&self, jobs: &[JobId], sources: usize) {
        info!(
            event = "run_started",
            mode = %self.mode,
            jobs = ?jobs,
            sources = sources,
            "Investigation started"
        );
    }

    /// Log a job placed on a node
    pub fn log_job_located(&self, job: JobId, node: &str, method: LocateMethod) {
        info!(
            event = "job_located",
            mode = %self.mode,
            job_id = %job,
            node = %node,
            method = %method,
            "Job located"
        );
    }

    /// Log a container resolved for a job
    pub fn log_container_resolved(
        &self,
        job: JobId,
        location: &str,
        container_id: &ContainerId,
        tier: ResolutionTier,
        candidates: usize,
    ) {
        if candidates > 1 {
            warn!(
                event = "container_resolved",
                mode = %self.mode,
                job_id = %job,
                location = %location,
                container_id = %container_id,
                tier = %tier,
                candidates = candidates,
                "Container resolved from ambiguous candidates"
            );
        } else {
            info!(
                event = "container_resolved",
                mode = %self.mode,
                job_id = %job,
                location = %location,
                container_id = %container_id,
                tier = %tier,
                "Container resolved"
            );
        }
    }

    /// Log the termination classification of a job
    pub fn log_classification(
        &self,
        job: JobId,
        container_id: &ContainerId,
        classification: Classification,
        pid: Option<u32>,
    ) {
        match classification {
            Classification::None => {
                debug!(
                    event = "classified",
                    mode = %self.mode,
                    job_id = %job,
                    container_id = %container_id,
                    classification = %classification,
                    "No OOM evidence"
                );
            }
            _ => {
                info!(
                    event = "classified",
                    mode = %self.mode,
                    job_id = %job,
                    container_id = %container_id,
                    classification = %classification,
                    pid = ?pid,
                    "OOM evidence found"
                );
            }
        }
    }

    /// Log a source that could not be read
    pub fn log_source_unavailable(&self, source: &str, reason: &str) {
        warn!(
            event = "source_unavailable",
            mode = %self.mode,
            source = %source,
            reason = %reason,
            "Evidence source unavailable, skipping"
        );
    }

    /// Log a job absent from every examined source
    pub fn log_job_not_found(&self, job: JobId, examined: usize) {
        warn!(
            event = "job_not_found",
            mode = %self.mode,
            job_id = %job,
            examined_sources = examined,
            "Job not found"
        );
    }

    /// Log the end of a run
    pub fn log_run_finished(&self, summary: &BatchSummary, retrievals: usize) {
        info!(
            event = "run_finished",
            mode = %self.mode,
            requested = summary.requested,
            found = summary.found,
            missing = ?summary.missing,
            retrievals = retrievals,
            "Investigation finished"
        );
    }
}

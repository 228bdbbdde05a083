//! Investigation runs over live clusters and offline bundles
//!
//! An investigation owns all state of one run: the evidence cache, the
//! resolver settings and the logger. Jobs are processed sequentially in
//! input order (duplicates dropped); a failure reading one source only
//! affects the jobs looked up there.

use crate::analysis::{self, Evidence};
use crate::error::Result;
use crate::models::{dedup_jobs, BatchSummary, Classification, JobId, JobReport};
use crate::observability::InvestigationLogger;
use crate::resolve::{
    patterns, AmbiguousPick, ClusterApi, ContainerResolver, LocationResolver, Resolution,
    DEFAULT_NODE_SELECTOR,
};
use crate::source::{
    discover_bundles, Bundle, BundleFetcher, EvidenceCache, LogFetcher, LogKind, SourceKey,
};
use std::collections::HashMap;
use std::path::Path;


/// Tunables shared by both modes
#[derive(Debug, Clone)]
pub struct InvestigationOptions {
    pub ambiguous_pick: AmbiguousPick,
    /// Trailing container log lines to attach (offline only); 0 disables
    pub container_log_tail: usize,
}

impl Default for InvestigationOptions {
    fn default() -> Self {
        Self {
            ambiguous_pick: AmbiguousPick::default(),
            container_log_tail: 20,
        }
    }
}

/// Reports for a batch plus its summary
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub reports: Vec<JobReport>,
    pub summary: BatchSummary,
}

impl RunOutcome {
    fn new(reports: Vec<JobReport>) -> Self {
        let summary = BatchSummary::from_reports(&reports);
        Self { reports, summary }
    }
}

/// Investigation over extracted sosreport bundles
pub struct OfflineInvestigation<F = BundleFetcher> {
    bundles: Vec<Bundle>,
    cache: EvidenceCache<F>,
    resolver: ContainerResolver,
    options: InvestigationOptions,
    logger: InvestigationLogger,
}

impl OfflineInvestigation<BundleFetcher> {
    /// Discover bundles under `dir`; fails if none exist
    pub async fn open(dir: &Path, options: InvestigationOptions) -> Result<Self> {
        let bundles = discover_bundles(dir).await?;
        Ok(Self::new(bundles, BundleFetcher, options))
    }
}

impl<F: LogFetcher> OfflineInvestigation<F> {
    pub fn new(bundles: Vec<Bundle>, fetcher: F, options: InvestigationOptions) -> Self {
        Self {
            bundles,
            cache: EvidenceCache::new(fetcher),
            resolver: ContainerResolver::new(options.ambiguous_pick),
            options,
            logger: InvestigationLogger::new("offline"),
        }
    }

    pub fn bundles(&self) -> &[Bundle] {
        &self.bundles
    }

    pub fn cache(&self) -> &EvidenceCache<F> {
        &self.cache
    }

    /// Investigate every job against every bundle
    pub async fn run(&mut self, jobs: &[JobId]) -> RunOutcome {
        let jobs = dedup_jobs(jobs);
        self.logger.log_run_started(&jobs, self.bundles.len());

        let mut reports = Vec::with_capacity(jobs.len());
        for job in &jobs {
            reports.push(self.investigate(*job).await);
        }

        let outcome = RunOutcome::new(reports);
        self.logger
            .log_run_finished(&outcome.summary, self.cache.retrievals());
        outcome
    }

    async fn investigate(&mut self, job: JobId) -> JobReport {
        let bundles = self.bundles.clone();
        for bundle in &bundles {
            let journal = match self.cache.fetch(&bundle.key(LogKind::Journal)).await {
                Ok(text) => text,
                Err(e) => {
                    self.logger
                        .log_source_unavailable(&bundle.source_name(), &e.to_string());
                    continue;
                }
            };
            if !journal.contains(&job.tag()) {
                continue;
            }

            let kernel = self.cache.fetch_optional(&bundle.key(LogKind::Kernel)).await;
            // A ring buffer without any oom-kill record has likely rotated
            // past the event, so the whole-boot log is needed to break ties
            let kernel_has_oom = kernel
                .as_deref()
                .is_some_and(|k| k.lines().any(patterns::is_oom_kill));
            let mut boot_kernel = if kernel_has_oom {
                None
            } else {
                self.cache
                    .fetch_optional(&bundle.key(LogKind::BootKernel))
                    .await
            };

            let auxiliary: Vec<&str> = [kernel.as_deref(), boot_kernel.as_deref()]
                .into_iter()
                .flatten()
                .collect();
            let Some(resolution) = self.resolver.resolve(job, &journal, &auxiliary) else {
                continue;
            };

            // dmesg holds other containers' kills only: read the whole-boot log too
            let kernel_has_match = kernel.as_deref().is_some_and(|k| {
                !analysis::oom_kill_lines(&resolution.container_id, k).is_empty()
            });
            if kernel_has_oom && !kernel_has_match {
                boot_kernel = self
                    .cache
                    .fetch_optional(&bundle.key(LogKind::BootKernel))
                    .await;
            }

            let evidence = Evidence {
                journal: &journal,
                kernel: kernel.as_deref(),
                boot_kernel: boot_kernel.as_deref(),
            };
            let mut report = build_report(&self.logger, job, &bundle.hostname, resolution, &evidence);

            if self.options.container_log_tail > 0 {
                if let Some(id) = &report.container_id {
                    let key = bundle.key(LogKind::ContainerLog(id.clone()));
                    if let Some(log) = self.cache.fetch_optional(&key).await {
                        report.container_log_tail = tail(&log, self.options.container_log_tail);
                    }
                }
            }
            return report;
        }

        self.logger.log_job_not_found(job, self.bundles.len());
        JobReport::not_found(job, None)
    }
}

/// Investigation against a running cluster
pub struct LiveInvestigation<C, F> {
    cluster: C,
    cache: EvidenceCache<F>,
    resolver: ContainerResolver,
    namespace: Option<String>,
    selector: String,
    logger: InvestigationLogger,
}

impl<C: ClusterApi, F: LogFetcher> LiveInvestigation<C, F> {
    pub fn new(cluster: C, fetcher: F, options: InvestigationOptions) -> Self {
        Self {
            cluster,
            cache: EvidenceCache::new(fetcher),
            resolver: ContainerResolver::new(options.ambiguous_pick),
            namespace: None,
            selector: DEFAULT_NODE_SELECTOR.to_string(),
            logger: InvestigationLogger::new("live"),
        }
    }

    /// Restrict event lookup to one namespace
    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    /// Label selector for nodes scanned when events are missing
    pub fn with_node_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = selector.into();
        self
    }

    pub fn cache(&self) -> &EvidenceCache<F> {
        &self.cache
    }

    /// Locate, resolve and classify every job
    pub async fn run(&mut self, jobs: &[JobId]) -> RunOutcome {
        let jobs = dedup_jobs(jobs);
        self.logger.log_run_started(&jobs, 0);

        let locations = LocationResolver::new(
            &self.cluster,
            self.namespace.as_deref(),
            &self.selector,
            &self.logger,
        )
        .resolve(&jobs, &mut self.cache)
        .await;

        // Each node's journal is fetched once for all of its jobs
        let mut by_job: HashMap<JobId, JobReport> = HashMap::with_capacity(jobs.len());
        for (node, node_jobs) in locations.by_node() {
            let journal = match self.cache.fetch(&SourceKey::journal(node)).await {
                Ok(text) => text,
                Err(e) => {
                    self.logger.log_source_unavailable(node, &e.to_string());
                    for job in node_jobs {
                        by_job.insert(job, JobReport::not_found(job, Some(node.to_string())));
                    }
                    continue;
                }
            };

            for job in node_jobs {
                let report = match self.resolver.resolve(job, &journal, &[]) {
                    Some(resolution) => build_report(
                        &self.logger,
                        job,
                        node,
                        resolution,
                        &Evidence::journal(&journal),
                    ),
                    None => {
                        self.logger.log_job_not_found(job, 1);
                        JobReport::not_found(job, Some(node.to_string()))
                    }
                };
                by_job.insert(job, report);
            }
        }

        let reports: Vec<JobReport> = jobs
            .iter()
            .map(|job| {
                by_job.remove(job).unwrap_or_else(|| {
                    self.logger
                        .log_job_not_found(*job, locations.scanned_nodes().len());
                    JobReport::not_found(*job, None)
                })
            })
            .collect();

        let outcome = RunOutcome::new(reports);
        self.logger
            .log_run_finished(&outcome.summary, self.cache.retrievals());
        outcome
    }
}

fn build_report(
    logger: &InvestigationLogger,
    job: JobId,
    location: &str,
    resolution: Resolution,
    evidence: &Evidence<'_>,
) -> JobReport {
    let container = resolution.container_id;
    logger.log_container_resolved(job, location, &container, resolution.tier, resolution.candidates);

    let verdict = analysis::classify(job, &container, evidence);
    logger.log_classification(job, &container, verdict.classification, verdict.pid);

    let memory = match (verdict.classification, verdict.oom_source) {
        (Classification::KernelOom, Some(source)) => {
            evidence
                .text(source)
                .map(|text| analysis::extract(text, verdict.pid, &container))
                .filter(|m| !m.is_empty())
        }
        _ => None,
    };

    JobReport {
        job_id: job,
        location: Some(location.to_string()),
        container_id: Some(container),
        resolved_by: Some(resolution.tier),
        classification: verdict.classification,
        oom_pid: verdict.pid,
        evidence: verdict.evidence,
        memory,
        container_log_tail: Vec::new(),
    }
}

fn tail(text: &str, lines: usize) -> Vec<String> {
    let all: Vec<&str> = text.lines().collect();
    let skip = all.len().saturating_sub(lines);
    all[skip..].iter().map(|l| l.to_string()).collect()
}

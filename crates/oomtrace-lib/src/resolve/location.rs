//! Job -> node resolution for live clusters
//!
//! Phase A reads scheduler events once and trusts them. Phase B handles the
//! jobs whose events have aged out: each candidate node's journal is fetched
//! once (through the run's [`EvidenceCache`]) and tested against every job
//! still outstanding, so the cost is bounded by the number of nodes rather
//! than jobs x nodes.

use super::container::ContainerResolver;
use super::patterns;
use crate::error::Result;
use crate::models::JobId;
use crate::observability::InvestigationLogger;
use crate::source::{EvidenceCache, LogFetcher, SourceKey};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Default node label selector for the scan phase
pub const DEFAULT_NODE_SELECTOR: &str = "node-role.kubernetes.io/worker";

/// Control-plane queries needed to place jobs on nodes
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Messages of all events, optionally limited to one namespace
    async fn event_messages(&self, namespace: Option<&str>) -> Result<Vec<String>>;

    /// Names of nodes matching a label selector
    async fn node_names(&self, selector: &str) -> Result<Vec<String>>;
}

/// How a job's node was determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocateMethod {
    Event,
    NodeScan,
}

impl std::fmt::Display for LocateMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocateMethod::Event => f.write_str("event"),
            LocateMethod::NodeScan => f.write_str("node-scan"),
        }
    }
}

/// Job -> node table for one batch
#[derive(Debug, Clone, Default)]
pub struct JobLocations {
    nodes: HashMap<JobId, (String, LocateMethod)>,
    scanned_nodes: Vec<String>,
}

impl JobLocations {
    pub fn node_of(&self, job: JobId) -> Option<&str> {
        self.nodes.get(&job).map(|(node, _)| node.as_str())
    }

    pub fn method_of(&self, job: JobId) -> Option<LocateMethod> {
        self.nodes.get(&job).map(|(_, method)| *method)
    }

    pub fn is_resolved(&self, job: JobId) -> bool {
        self.nodes.contains_key(&job)
    }

    /// Jobs from `jobs` that have no node yet, in the given order
    pub fn unresolved(&self, jobs: &[JobId]) -> Vec<JobId> {
        jobs.iter().copied().filter(|j| !self.is_resolved(*j)).collect()
    }

    /// Jobs grouped by the node they ran on
    pub fn by_node(&self) -> BTreeMap<&str, Vec<JobId>> {
        let mut grouped: BTreeMap<&str, Vec<JobId>> = BTreeMap::new();
        for (job, (node, _)) in &self.nodes {
            grouped.entry(node.as_str()).or_default().push(*job);
        }
        for jobs in grouped.values_mut() {
            jobs.sort();
        }
        grouped
    }

    /// Nodes whose journal was fetched during the scan phase
    pub fn scanned_nodes(&self) -> &[String] {
        &self.scanned_nodes
    }

    fn insert(&mut self, job: JobId, node: String, method: LocateMethod) {
        self.nodes.entry(job).or_insert((node, method));
    }
}

/// Two-phase job placement against a cluster
pub struct LocationResolver<'a, C> {
    cluster: &'a C,
    namespace: Option<&'a str>,
    selector: &'a str,
    logger: &'a InvestigationLogger,
}

impl<'a, C: ClusterApi> LocationResolver<'a, C> {
    pub fn new(
        cluster: &'a C,
        namespace: Option<&'a str>,
        selector: &'a str,
        logger: &'a InvestigationLogger,
    ) -> Self {
        Self {
            cluster,
            namespace,
            selector,
            logger,
        }
    }

    /// Place every job, sharing node journal fetches through `cache`
    pub async fn resolve<F: LogFetcher>(
        &self,
        jobs: &[JobId],
        cache: &mut EvidenceCache<F>,
    ) -> JobLocations {
        let mut locations = JobLocations::default();

        match self.cluster.event_messages(self.namespace).await {
            Ok(messages) => locate_from_events(jobs, &messages, &mut locations, self.logger),
            Err(e) => self.logger.log_source_unavailable("events", &e.to_string()),
        }

        if !locations.unresolved(jobs).is_empty() {
            self.scan_nodes(jobs, cache, &mut locations).await;
        }

        locations
    }

    async fn scan_nodes<F: LogFetcher>(
        &self,
        jobs: &[JobId],
        cache: &mut EvidenceCache<F>,
        locations: &mut JobLocations,
    ) {
        let nodes = match self.cluster.node_names(self.selector).await {
            Ok(nodes) => nodes,
            Err(e) => {
                self.logger.log_source_unavailable("nodes", &e.to_string());
                return;
            }
        };

        let mut outstanding = locations.unresolved(jobs);
        for node in nodes {
            if outstanding.is_empty() {
                break;
            }

            let text = match cache.fetch(&SourceKey::journal(node.as_str())).await {
                Ok(text) => text,
                Err(e) => {
                    self.logger.log_source_unavailable(&node, &e.to_string());
                    continue;
                }
            };
            locations.scanned_nodes.push(node.clone());

            outstanding.retain(|job| {
                if ContainerResolver::has_started_record(*job, &text) {
                    self.logger.log_job_located(*job, &node, LocateMethod::NodeScan);
                    locations.insert(*job, node.clone(), LocateMethod::NodeScan);
                    false
                } else {
                    true
                }
            });
        }
    }
}

/// Phase A: place jobs named by scheduler "assigned" events
pub fn locate_from_events(
    jobs: &[JobId],
    messages: &[String],
    locations: &mut JobLocations,
    logger: &InvestigationLogger,
) {
    for job in jobs {
        if locations.is_resolved(*job) {
            continue;
        }
        if let Some(node) = messages.iter().find_map(|m| patterns::assigned_node(m, *job)) {
            logger.log_job_located(*job, &node, LocateMethod::Event);
            locations.insert(*job, node, LocateMethod::Event);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory cluster for tests

    use super::*;
    use crate::error::TraceError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct FakeCluster {
        pub events: Vec<String>,
        pub nodes: Vec<String>,
        pub events_fail: bool,
        pub node_queries: AtomicUsize,
    }

    impl FakeCluster {
        pub fn node_queries(&self) -> usize {
            self.node_queries.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ClusterApi for FakeCluster {
        async fn event_messages(&self, _namespace: Option<&str>) -> Result<Vec<String>> {
            if self.events_fail {
                return Err(TraceError::unavailable("events", "forbidden"));
            }
            Ok(self.events.clone())
        }

        async fn node_names(&self, _selector: &str) -> Result<Vec<String>> {
            self.node_queries.fetch_add(1, Ordering::SeqCst);
            Ok(self.nodes.clone())
        }
    }
}

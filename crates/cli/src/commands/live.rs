//! Investigation against a running cluster

use anyhow::{Context, Result};
use oomtrace_lib::investigate::LiveInvestigation;
use oomtrace_lib::models::{ExitStatus, JobId};
use oomtrace_lib::resolve::KubeCluster;
use oomtrace_lib::source::{ensure_on_path, NodeLogFetcher};
use tracing::debug;

use crate::config::Settings;
use crate::output::{self, print_info, OutputFormat};

/// Locate and investigate `jobs` on the cluster of the current kube context
pub async fn investigate(
    jobs: &[JobId],
    settings: &Settings,
    format: OutputFormat,
) -> Result<ExitStatus> {
    let program = ensure_on_path(&settings.node_log_command)?;
    debug!(program = %program.display(), "Node log command found");

    let cluster = KubeCluster::connect()
        .await
        .context("Failed to create Kubernetes client")?;
    // Dropping the fetcher removes its spool directory
    let fetcher = NodeLogFetcher::new(settings.node_log_command.clone())?;

    if matches!(format, OutputFormat::Table) {
        print_info(&format!(
            "Investigating {} job(s), node selector {}",
            jobs.len(),
            settings.node_selector
        ));
    }

    let mut investigation = LiveInvestigation::new(cluster, fetcher, settings.options())
        .with_namespace(settings.namespace.clone())
        .with_node_selector(settings.node_selector.clone());
    let outcome = investigation.run(jobs).await;

    output::print_outcome(&outcome, format)?;
    Ok(outcome.summary.exit_status())
}

//! Investigation over extracted sosreport bundles

use anyhow::Result;
use oomtrace_lib::investigate::OfflineInvestigation;
use oomtrace_lib::models::{ExitStatus, JobId};
use std::path::Path;

use crate::config::Settings;
use crate::output::{self, print_info, OutputFormat};

/// Investigate `jobs` against every bundle found under `dir`
pub async fn investigate(
    dir: &Path,
    jobs: &[JobId],
    settings: &Settings,
    format: OutputFormat,
) -> Result<ExitStatus> {
    let mut investigation = OfflineInvestigation::open(dir, settings.options()).await?;

    if matches!(format, OutputFormat::Table) {
        let hosts: Vec<&str> = investigation
            .bundles()
            .iter()
            .map(|b| b.hostname.as_str())
            .collect();
        print_info(&format!(
            "Found {} bundle(s): {}",
            hosts.len(),
            hosts.join(", ")
        ));
    }

    let outcome = investigation.run(jobs).await;
    output::print_outcome(&outcome, format)?;
    Ok(outcome.summary.exit_status())
}

//! oomtrace CLI
//!
//! Finds out whether automation jobs died from a memory eviction or a
//! kernel OOM kill, either on a live cluster or from sosreport bundles.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use oomtrace_lib::models::{ExitStatus, JobId};
use oomtrace_lib::resolve::AmbiguousPick;
use oomtrace_lib::TraceError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Trace automation jobs to their OOM evidence
#[derive(Parser)]
#[command(name = "oomtrace")]
#[command(author, version, about = "Trace automation jobs killed for memory to their OOM evidence", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable debug logging on stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Config file (default: ~/.config/oomtrace/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Container to pick when several candidates remain
    #[arg(long, global = true)]
    pub ambiguous_pick: Option<PickArg>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Investigate jobs on the cluster of the current kube context
    Live {
        /// Job IDs to investigate
        #[arg(required = true)]
        jobs: Vec<String>,

        /// Namespace to read scheduler events from
        #[arg(long, short)]
        namespace: Option<String>,

        /// Label selector for nodes scanned when events are missing
        #[arg(long)]
        node_selector: Option<String>,

        /// Program used to stream node journals
        #[arg(long)]
        node_log_command: Option<String>,
    },

    /// Investigate jobs in extracted sosreport bundles
    Offline {
        /// Directory containing extracted sosreports
        #[arg(long, short)]
        dir: PathBuf,

        /// Job IDs to investigate
        #[arg(required = true)]
        jobs: Vec<String>,

        /// Container log lines to attach to each report (0 disables)
        #[arg(long)]
        tail: Option<usize>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PickArg {
    First,
    Last,
}

impl From<PickArg> for AmbiguousPick {
    fn from(pick: PickArg) -> Self {
        match pick {
            PickArg::First => AmbiguousPick::First,
            PickArg::Last => AmbiguousPick::Last,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match run(cli).await {
        Ok(status) => ExitCode::from(status.code()),
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::from(ExitStatus::Failure.code())
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose {
        "oomtrace=debug,oomtrace_lib=debug,warn"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli) -> Result<ExitStatus> {
    let mut settings = config::Settings::load(cli.config.as_deref())?;
    if let Some(pick) = cli.ambiguous_pick {
        settings.ambiguous_pick = pick.into();
    }
    let format = cli.format;

    let command = async move {
        match cli.command {
            Commands::Live {
                jobs,
                namespace,
                node_selector,
                node_log_command,
            } => {
                let jobs = parse_jobs(&jobs)?;
                if namespace.is_some() {
                    settings.namespace = namespace;
                }
                if let Some(selector) = node_selector {
                    settings.node_selector = selector;
                }
                if let Some(program) = node_log_command {
                    settings.node_log_command = program;
                }
                debug!(?settings, "Settings resolved");
                commands::live::investigate(&jobs, &settings, format).await
            }
            Commands::Offline { dir, jobs, tail } => {
                let jobs = parse_jobs(&jobs)?;
                if let Some(lines) = tail {
                    settings.container_log_tail = lines;
                }
                debug!(?settings, "Settings resolved");
                commands::offline::investigate(&dir, &jobs, &settings, format).await
            }
        }
    };

    // Losing the race drops the command, killing any running node log
    // command and removing the spooled logs
    tokio::select! {
        result = command => result,
        signal = shutdown_signal() => {
            output::print_warning(&format!("Interrupted by {}", signal));
            Ok(ExitStatus::Failure)
        }
    }
}

/// Resolves with the name of the first termination signal received
#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut terminate, mut hangup) =
        match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
            (Ok(terminate), Ok(hangup)) => (terminate, hangup),
            _ => {
                debug!("SIGTERM/SIGHUP handlers unavailable, watching SIGINT only");
                return interrupt().await;
            }
        };

    tokio::select! {
        name = interrupt() => name,
        Some(()) = terminate.recv() => "SIGTERM",
        Some(()) = hangup.recv() => "SIGHUP",
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    interrupt().await
}

/// Ctrl-C; never resolves if the handler cannot be installed
async fn interrupt() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        debug!(error = %e, "SIGINT handler unavailable");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}

fn parse_jobs(raw: &[String]) -> Result<Vec<JobId>> {
    let jobs = raw
        .iter()
        .map(|s| s.parse::<JobId>())
        .collect::<Result<Vec<_>, TraceError>>()?;
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_jobs() {
        let jobs = parse_jobs(&["4".to_string(), "42".to_string()]).unwrap();
        assert_eq!(jobs, vec![JobId::new(4), JobId::new(42)]);
        assert!(parse_jobs(&["4".to_string(), "job-5".to_string()]).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hangup_ends_the_run() {
        let waiter = tokio::spawn(shutdown_signal());
        // let the handlers install before signalling ourselves
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = std::process::Command::new("kill")
            .args(["-HUP", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let name = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("signal should be observed")
            .unwrap();
        assert_eq!(name, "SIGHUP");
    }
}

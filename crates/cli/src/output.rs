//! Output formatting utilities

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use oomtrace_lib::analysis::format_kb;
use oomtrace_lib::investigate::RunOutcome;
use oomtrace_lib::models::{BatchSummary, Classification, ExitStatus, JobReport, MemoryReport};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Row for the per-job overview table
#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "Job")]
    job: String,
    #[tabled(rename = "Location")]
    location: String,
    #[tabled(rename = "Container")]
    container: String,
    #[tabled(rename = "Resolved By")]
    resolved_by: String,
    #[tabled(rename = "Classification")]
    classification: String,
    #[tabled(rename = "PID")]
    pid: String,
}

/// Row for the per-process RSS breakdown
#[derive(Tabled)]
struct ProcessRow {
    #[tabled(rename = "Process")]
    name: String,
    #[tabled(rename = "Tasks")]
    count: u32,
    #[tabled(rename = "RSS")]
    rss: String,
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    generated_at: DateTime<Utc>,
    reports: &'a [JobReport],
    summary: &'a BatchSummary,
    exit_status: ExitStatus,
}

/// Print the reports and summary of a run
pub fn print_outcome(outcome: &RunOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let output = JsonOutput {
                generated_at: Utc::now(),
                reports: &outcome.reports,
                summary: &outcome.summary,
                exit_status: outcome.summary.exit_status(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("{}", "OOM Investigation".bold());
            println!("{}", "=".repeat(60));

            let rows: Vec<JobRow> = outcome.reports.iter().map(job_row).collect();
            println!("{}", Table::new(rows).with(Style::rounded()).to_string());

            for report in outcome.reports.iter().filter(|r| r.is_found()) {
                print_details(report);
            }

            println!();
            print_summary(&outcome.summary);
        }
    }
    Ok(())
}

fn job_row(report: &JobReport) -> JobRow {
    let dash = || "-".to_string();
    JobRow {
        job: report.job_id.to_string(),
        location: report.location.clone().unwrap_or_else(dash),
        container: report
            .container_id
            .as_ref()
            .map(|id| id.short().to_string())
            .unwrap_or_else(dash),
        resolved_by: report
            .resolved_by
            .map(|tier| tier.to_string())
            .unwrap_or_else(dash),
        classification: if report.is_found() {
            color_classification(report.classification)
        } else {
            "not found".red().to_string()
        },
        pid: report.oom_pid.map(|p| p.to_string()).unwrap_or_else(dash),
    }
}

fn print_details(report: &JobReport) {
    println!();
    println!(
        "{} {}",
        format!("Job {}", report.job_id).bold(),
        color_classification(report.classification)
    );
    if let Some(id) = &report.container_id {
        println!("  Container: {}", id.to_string().cyan());
    }

    if let Some(memory) = &report.memory {
        print_memory(memory);
    }

    if !report.evidence.is_empty() {
        println!("  {}", "Evidence:".bold());
        for line in &report.evidence {
            println!("    {}", line.dimmed());
        }
    }

    if !report.container_log_tail.is_empty() {
        println!(
            "  {}",
            format!("Container log (last {} lines):", report.container_log_tail.len()).bold()
        );
        for line in &report.container_log_tail {
            println!("    {}", line);
        }
    }
}

fn print_memory(memory: &MemoryReport) {
    let victim = &memory.victim;
    let name = victim.name.as_deref().unwrap_or("?");
    match victim.pid {
        Some(pid) => println!("  Victim:    {} ({})", pid, name.cyan()),
        None => println!("  Victim:    {}", name.cyan()),
    }

    let fields = [
        ("total-vm", victim.total_vm_kb),
        ("anon-rss", victim.anon_rss_kb),
        ("file-rss", victim.file_rss_kb),
        ("shmem-rss", victim.shmem_rss_kb),
    ];
    for (label, value) in fields {
        if let Some(kb) = value {
            println!("  {:<10} {}", format!("{}:", label), format_kb(kb));
        }
    }

    if let Some(cgroup) = &memory.cgroup {
        println!(
            "  cgroup:    usage {} / limit {}, failcnt {}",
            format_kb(cgroup.usage_kb),
            format_kb(cgroup.limit_kb),
            cgroup.failcnt
        );
    }

    let rows: Vec<ProcessRow> = memory
        .top_processes()
        .into_iter()
        .map(|(name, rss)| ProcessRow {
            name: name.to_string(),
            count: rss.count,
            rss: format_kb(rss.rss_kb),
        })
        .collect();
    if !rows.is_empty() {
        println!("{}", Table::new(rows).with(Style::rounded()).to_string());
    }
}

fn print_summary(summary: &BatchSummary) {
    let line = format!("{} of {} jobs found", summary.found, summary.requested);
    match summary.exit_status() {
        ExitStatus::Success => print_success(&line),
        ExitStatus::Partial => print_warning(&line),
        ExitStatus::Failure => print_error(&line),
    }
    if !summary.missing.is_empty() {
        let missing: Vec<String> = summary.missing.iter().map(|j| j.to_string()).collect();
        println!("  Missing: {}", missing.join(", "));
    }
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Color a classification by severity
pub fn color_classification(classification: Classification) -> String {
    let text = classification.to_string();
    match classification {
        Classification::KernelOom => text.red().bold().to_string(),
        Classification::Eviction => text.yellow().to_string(),
        Classification::None => text.green().to_string(),
    }
}

//! Ledger status report.

use console::style;
use serde::Serialize;

use corpus_ledger::models::{PipelineRun, QuotaUsage, ResourceState, RunStatus};
use corpus_ledger::Ledger;

use crate::cli::helpers::{format_duration, format_time};

#[derive(Serialize)]
struct SourceStatus {
    source: String,
    states: Vec<(ResourceState, u64)>,
    quota_today: Option<QuotaUsage>,
}

#[derive(Serialize)]
struct StatusReport {
    backend: String,
    sources: Vec<SourceStatus>,
    recent_runs: Vec<PipelineRun>,
}

/// Print resource counts per state, today's quota usage and recent runs.
pub async fn cmd_status(
    ledger: &Ledger,
    source: Option<&str>,
    runs: u32,
    json: bool,
) -> anyhow::Result<()> {
    let names = match source {
        Some(name) => vec![name.to_string()],
        None => ledger.list_sources().await?,
    };

    let today = ledger.clock().today();
    let mut sources = Vec::with_capacity(names.len());
    for name in names {
        let counts = ledger.count_by_state(Some(&name)).await?;
        let quota_today = ledger.quota_usage(&name, today).await?;
        sources.push(SourceStatus {
            source: name,
            states: counts.iter().collect(),
            quota_today,
        });
    }
    let report = StatusReport {
        backend: ledger.backend().to_string(),
        sources,
        recent_runs: ledger.recent_runs(source, runs).await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    print_report(&report);
    Ok(())
}

fn print_report(report: &StatusReport) {
    println!(
        "{}",
        style(format!("Ledger Status ({})", report.backend)).bold()
    );

    if report.sources.is_empty() {
        println!("{} No resources recorded", style("!").yellow());
    }

    for status in &report.sources {
        println!("\n{}", style(&status.source).bold());
        println!("{}", "-".repeat(40));
        for (state, count) in &status.states {
            println!("{:<20} {}", format!("{}:", state), count);
        }
        match &status.quota_today {
            Some(usage) => println!(
                "{:<20} {}/{} ({} remaining)",
                "Quota Today:",
                usage.records_ingested,
                usage.quota_limit,
                usage.remaining()
            ),
            None => println!("{:<20} {}", "Quota Today:", style("unused").dim()),
        }
    }

    if report.recent_runs.is_empty() {
        return;
    }
    println!("\n{}", style("Recent Runs").bold());
    println!("{}", "-".repeat(40));
    for run in &report.recent_runs {
        let status = match run.status {
            RunStatus::Success => style(run.status.as_str()).green().to_string(),
            RunStatus::Failed => style(run.status.as_str()).red().to_string(),
            RunStatus::QuotaLimited => style(run.status.as_str()).yellow().to_string(),
            RunStatus::Running => style(run.status.as_str()).cyan().to_string(),
        };
        let duration = run
            .duration()
            .map(format_duration)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<16} {:<14} {:>8}  {} processed, {} written",
            format_time(run.start_time),
            run.source,
            status,
            duration,
            run.records_processed,
            run.records_written
        );
        if let Some(error) = &run.error_summary {
            println!("    {} {}", style("error:").red(), error);
        }
    }
}

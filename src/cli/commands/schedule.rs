//! Cadence report.

use std::process::ExitCode;

use console::style;

use corpus_ledger::config::OrchestratorConfig;
use corpus_ledger::orchestrator::check_eligibility;
use corpus_ledger::Ledger;

use crate::cli::helpers::{format_duration, format_time, parse_duration, parse_source_spec};

/// Report, for each `NAME=CADENCE`, whether the source is due now.
pub async fn cmd_schedule(
    ledger: &Ledger,
    specs: &[String],
    initial_window: &str,
    force: bool,
) -> anyhow::Result<ExitCode> {
    let config = OrchestratorConfig {
        initial_window: parse_duration(initial_window)?,
        force,
        ..OrchestratorConfig::default()
    };
    let now = ledger.now();

    for spec in specs {
        let schedule = parse_source_spec(spec)?;
        let eligibility = check_eligibility(ledger, &schedule, &config, now).await?;
        if eligibility.run {
            println!(
                "{} {:<16} due ({})",
                style("●").green(),
                schedule.source,
                eligibility.reason
            );
        } else {
            println!(
                "{} {:<16} {} until {} (in {})",
                style("○").dim(),
                schedule.source,
                eligibility.reason,
                format_time(eligibility.next_eligible_at),
                format_duration(eligibility.next_eligible_at - now)
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

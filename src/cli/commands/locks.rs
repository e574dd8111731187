//! Lock inspection and housekeeping.

use console::style;

use corpus_ledger::coordination::LockManager;
use corpus_ledger::Ledger;

use crate::cli::helpers::{format_time, parse_duration};

pub async fn cmd_list(ledger: &Ledger) -> anyhow::Result<()> {
    let locks = LockManager::new(ledger.clone()).list().await?;
    if locks.is_empty() {
        println!("{} No locks held", style("!").yellow());
        return Ok(());
    }

    let now = ledger.now();
    println!(
        "{:<20} {:<30} {:<17} {:<17}",
        "SOURCE", "OWNER", "ACQUIRED", "EXPIRES"
    );
    for lock in locks {
        let expires = if lock.is_expired(now) {
            style(format_time(lock.expires_at)).red().to_string()
        } else {
            format_time(lock.expires_at)
        };
        println!(
            "{:<20} {:<30} {:<17} {}",
            lock.source,
            lock.owner_id,
            format_time(lock.acquired_at),
            expires
        );
    }
    Ok(())
}

pub async fn cmd_release(ledger: &Ledger, source: &str, owner: &str) -> anyhow::Result<()> {
    if LockManager::new(ledger.clone()).release(source, owner).await? {
        println!("{} Released lock for {}", style("✓").green(), source);
    } else {
        println!(
            "{} No lock for {} held by {}",
            style("!").yellow(),
            source,
            owner
        );
    }
    Ok(())
}

pub async fn cmd_cleanup(ledger: &Ledger, max_age: &str) -> anyhow::Result<()> {
    let removed = LockManager::new(ledger.clone())
        .cleanup_stale_locks(parse_duration(max_age)?)
        .await?;
    println!("{} Removed {} stale lock(s)", style("✓").green(), removed);
    Ok(())
}

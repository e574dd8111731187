//! Retention pass.

use anyhow::Context;
use console::style;

use corpus_ledger::coordination::LockManager;
use corpus_ledger::Ledger;

use crate::cli::helpers::parse_duration;

pub async fn cmd_cleanup(
    ledger: &Ledger,
    older_than: &str,
    abandon_after: &str,
    lock_max_age: &str,
) -> anyhow::Result<()> {
    let cutoff = ledger
        .now()
        .checked_sub_signed(parse_duration(older_than)?)
        .with_context(|| format!("--older-than {} reaches before the supported time range", older_than))?;
    let abandon_after = parse_duration(abandon_after)?;
    let lock_max_age = parse_duration(lock_max_age)?;

    let runs = ledger.abandon_stale_runs(abandon_after).await?;
    let locks = LockManager::new(ledger.clone())
        .cleanup_stale_locks(lock_max_age)
        .await?;
    let purged = ledger.purge_resources(cutoff).await?;

    println!("{} Cleanup complete", style("✓").green());
    println!("  {:<22} {}", "Abandoned runs:", runs);
    println!("  {:<22} {}", "Stale locks removed:", locks);
    println!("  {:<22} {}", "Resources purged:", purged);
    Ok(())
}

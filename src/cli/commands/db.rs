//! Schema management.

use console::style;

use corpus_ledger::config::LedgerConfig;
use corpus_ledger::repository::migrations::run_migrations;
use corpus_ledger::repository::util::redact_url_password;

/// Apply pending migrations.
pub async fn cmd_migrate(config: &LedgerConfig) -> anyhow::Result<()> {
    println!("{} Database migration", style("→").cyan());
    println!("  Database: {}", redact_url_password(&config.database_url));
    println!("  Backend:  {}", config.backend);

    let applied = run_migrations(config).await?;
    if applied.is_empty() {
        println!("{} Schema is up to date", style("✓").green());
    } else {
        for name in &applied {
            println!("  {} {}", style("+").green(), name);
        }
        println!(
            "{} Applied {} migration(s)",
            style("✓").green(),
            applied.len()
        );
    }
    Ok(())
}

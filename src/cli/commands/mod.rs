//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod cleanup;
mod db;
mod locks;
mod schedule;
mod status;

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};

use corpus_ledger::config::{
    BackendKind, LedgerConfig, DEFAULT_DATABASE_FILENAME, DEFAULT_INITIAL_WINDOW_DAYS,
};
use corpus_ledger::Ledger;

#[derive(Parser)]
#[command(name = "corpus-ledger")]
#[command(about = "Crawl ledger, deduplication and cadence scheduling for corpus ingestion")]
#[command(version)]
pub struct Cli {
    /// Database URL or SQLite file path
    #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_FILENAME, global = true)]
    database_url: String,

    /// Storage backend (inferred from the URL when omitted)
    #[arg(long, value_enum, global = true)]
    backend: Option<BackendKind>,

    /// Per-statement timeout in seconds
    #[arg(long, default_value = "30", global = true)]
    statement_timeout_secs: u64,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn ledger_config(&self) -> LedgerConfig {
        let mut config = LedgerConfig::from_url(&self.database_url)
            .statement_timeout(Duration::from_secs(self.statement_timeout_secs));
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        config
    }

    async fn connect(&self) -> anyhow::Result<Ledger> {
        Ok(Ledger::connect(&self.ledger_config()).await?)
    }
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the ledger schema
    Migrate,

    /// Show resource counts, quotas and recent runs
    Status {
        /// Limit to one source
        source: Option<String>,
        /// Number of recent runs to list
        #[arg(long, default_value = "10")]
        runs: u32,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show which sources are due to run
    Schedule {
        /// Sources as NAME=CADENCE, e.g. news=24h wiki=7d
        #[arg(required = true)]
        sources: Vec<String>,
        /// Length of the initial collection window
        #[arg(long, default_value_t = format!("{}d", DEFAULT_INITIAL_WINDOW_DAYS))]
        initial_window: String,
        /// Report every source as due
        #[arg(long)]
        force: bool,
    },

    /// Inspect and manage source locks
    Locks {
        #[command(subcommand)]
        command: LockCommands,
    },

    /// Retention pass: purge old failed/duplicate rows and close abandoned runs
    Cleanup {
        /// Purge failed/duplicate resources not updated for this long
        #[arg(long, default_value = "30d")]
        older_than: String,
        /// Fail runs left running for this long
        #[arg(long, default_value = "6h")]
        abandon_after: String,
        /// Delete locks older than this
        #[arg(long, default_value = "2h")]
        lock_max_age: String,
    },
}

#[derive(Subcommand)]
enum LockCommands {
    /// List live and expired locks
    List,
    /// Release a lock held by an owner
    Release {
        source: String,
        /// Owner that holds the lock
        #[arg(long)]
        owner: String,
    },
    /// Delete locks older than a maximum age
    Cleanup {
        #[arg(long, default_value = "2h")]
        max_age: String,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Migrate => db::cmd_migrate(&cli.ledger_config()).await?,
        Commands::Status { source, runs, json } => {
            let ledger = cli.connect().await?;
            status::cmd_status(&ledger, source.as_deref(), *runs, *json).await?
        }
        Commands::Schedule {
            sources,
            initial_window,
            force,
        } => {
            let ledger = cli.connect().await?;
            return schedule::cmd_schedule(&ledger, sources, initial_window, *force).await;
        }
        Commands::Locks { command } => {
            let ledger = cli.connect().await?;
            match command {
                LockCommands::List => locks::cmd_list(&ledger).await?,
                LockCommands::Release { source, owner } => {
                    locks::cmd_release(&ledger, source, owner).await?
                }
                LockCommands::Cleanup { max_age } => locks::cmd_cleanup(&ledger, max_age).await?,
            }
        }
        Commands::Cleanup {
            older_than,
            abandon_after,
            lock_max_age,
        } => {
            let ledger = cli.connect().await?;
            cleanup::cmd_cleanup(&ledger, older_than, abandon_after, lock_max_age).await?
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_global_args_after_subcommand() {
        let cli = Cli::try_parse_from([
            "corpus-ledger",
            "status",
            "news",
            "--database-url",
            "postgres://db/corpus",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.ledger_config().backend, BackendKind::Networked);
        assert!(matches!(cli.command, Commands::Status { ref source, .. } if source.as_deref() == Some("news")));
    }

    #[test]
    fn test_backend_flag_overrides_url() {
        let cli = Cli::try_parse_from([
            "corpus-ledger",
            "--backend",
            "embedded",
            "--database-url",
            "postgres://db/corpus",
            "migrate",
        ])
        .unwrap();
        assert_eq!(cli.ledger_config().backend, BackendKind::Embedded);
    }

    #[test]
    fn test_schedule_requires_sources() {
        assert!(Cli::try_parse_from(["corpus-ledger", "schedule"]).is_err());
    }
}

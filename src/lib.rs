//! corpus-ledger - crawl ledger, deduplication engine and cadence
//! orchestrator for corpus ingestion pipelines.
//!
//! The [`Ledger`] records every discovered resource and the state it has
//! reached, indexes processed text for exact and near-duplicate
//! detection, and stores the locks, quotas and run history the
//! [`Orchestrator`] uses to decide which sources run and when.

pub mod clock;
pub mod config;
pub mod coordination;
pub mod dedup;
pub mod migrations;
pub mod models;
pub mod orchestrator;
pub mod output;
pub mod repository;
pub mod schema;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BackendKind, DedupConfig, LedgerConfig, OrchestratorConfig, SourceSchedule};
pub use coordination::{LockLease, LockManager, QuotaTracker};
pub use dedup::{DedupEngine, DedupStats, DedupVerdict};
pub use orchestrator::{CycleReport, Orchestrator, Pipeline, PipelineOutcome, RunContext};
pub use repository::{ErrorKind, Ledger, LedgerError, LedgerResult};

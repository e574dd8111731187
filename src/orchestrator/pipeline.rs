//! The seam between the orchestrator and source pipelines.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::coordination::QuotaTracker;
use crate::dedup::{DedupStats, DedupVerdict};
use crate::models::QuotaDecision;
use crate::repository::{Ledger, LedgerError, LedgerResult};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// How a pipeline run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    /// Stopped early because the daily quota ran out.
    QuotaLimited,
}

/// A source-specific ingestion pipeline.
///
/// Runs on its own task while the orchestrator holds the source lock.
/// Pipelines should call [`RunContext::reserve`] before each fetch batch
/// and route fetched text through [`RunContext::process_document`].
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn run(&self, ctx: RunContext) -> Result<PipelineOutcome, PipelineError>;
}

#[derive(Debug, Default)]
struct RunCounters {
    processed: AtomicU64,
    written: AtomicU64,
    dedup: Mutex<DedupStats>,
}

/// Everything a pipeline may touch during one run.
#[derive(Clone)]
pub struct RunContext {
    ledger: Ledger,
    quota: QuotaTracker,
    run_id: String,
    source: String,
    daily_quota: u64,
    cancel: watch::Receiver<bool>,
    counters: Arc<RunCounters>,
}

impl RunContext {
    pub fn new(
        ledger: Ledger,
        run_id: impl Into<String>,
        source: impl Into<String>,
        daily_quota: u64,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            quota: QuotaTracker::new(ledger.clone()),
            ledger,
            run_id: run_id.into(),
            source: source.into(),
            daily_quota,
            cancel,
            counters: Arc::new(RunCounters::default()),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn daily_quota(&self) -> u64 {
        self.daily_quota
    }

    /// Reserve `n` records of today's quota for this source.
    pub async fn reserve(&self, n: u64) -> LedgerResult<QuotaDecision> {
        self.quota
            .check_and_increment_today(&self.source, self.daily_quota, n)
            .await
    }

    /// Deduplicate a fetched document and count the verdict.
    pub async fn process_document(&self, url: &str, text: &str) -> LedgerResult<DedupVerdict> {
        let verdict = self.ledger.process_document(url, text).await?;
        self.counters
            .dedup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(&verdict);
        self.add_processed(1);
        Ok(verdict)
    }

    pub fn add_processed(&self, n: u64) {
        self.counters.processed.fetch_add(n, Ordering::Relaxed);
    }

    /// Count records written to the corpus output.
    pub fn add_written(&self, n: u64) {
        self.counters.written.fetch_add(n, Ordering::Relaxed);
    }

    pub fn records_processed(&self) -> u64 {
        self.counters.processed.load(Ordering::Relaxed)
    }

    pub fn records_written(&self) -> u64 {
        self.counters.written.load(Ordering::Relaxed)
    }

    pub fn dedup_stats(&self) -> DedupStats {
        *self.counters.dedup.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the orchestrator asked this run to stop.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("source", &self.source)
            .field("daily_quota", &self.daily_quota)
            .finish()
    }
}

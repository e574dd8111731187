//! One scheduling cycle across all configured sources.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

use super::cadence::{evaluate, Eligibility};
use super::pipeline::{Pipeline, PipelineError, PipelineOutcome, RunContext};
use crate::config::{OrchestratorConfig, SourceSchedule};
use crate::coordination::{LockLease, LockManager};
use crate::dedup::DedupStats;
use crate::models::{RunCompletion, RunStatus};
use crate::repository::{Ledger, LedgerError, LedgerResult};

struct SourceEntry {
    schedule: SourceSchedule,
    pipeline: Arc<dyn Pipeline>,
}

/// Cancels in-flight runs of an [`Orchestrator`].
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// What happened to one source in a cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SourceOutcome {
    /// Not due yet.
    Skipped { eligibility: Eligibility },
    /// Another owner is running this source.
    LockHeld {
        owner_id: String,
        expires_at: DateTime<Utc>,
    },
    /// Cancellation was requested before the source started.
    Cancelled,
    /// A run was recorded.
    Completed {
        run_id: String,
        status: RunStatus,
        error_summary: Option<String>,
        records_processed: u64,
        records_written: u64,
        dedup: DedupStats,
    },
    /// The ledger failed before a run could be recorded or finalized.
    Errored { error: String },
}

impl SourceOutcome {
    pub fn is_failure(&self) -> bool {
        match self {
            Self::Completed { status, .. } => *status == RunStatus::Failed,
            Self::Errored { .. } => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: String,
    #[serde(flatten)]
    pub outcome: SourceOutcome,
}

/// Result of [`Orchestrator::run_cycle`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub sources: Vec<SourceReport>,
}

impl CycleReport {
    pub fn get(&self, source: &str) -> Option<&SourceOutcome> {
        self.sources
            .iter()
            .find(|r| r.source == source)
            .map(|r| &r.outcome)
    }

    pub fn has_failures(&self) -> bool {
        self.sources.iter().any(|r| r.outcome.is_failure())
    }

    /// Process exit status: 1 if any source failed.
    pub fn exit_code(&self) -> u8 {
        u8::from(self.has_failures())
    }

    pub fn dedup_totals(&self) -> DedupStats {
        let mut totals = DedupStats::default();
        for report in &self.sources {
            if let SourceOutcome::Completed { dedup, .. } = &report.outcome {
                totals.merge(dedup);
            }
        }
        totals
    }
}

type PipelineTask = JoinHandle<Result<PipelineOutcome, PipelineError>>;

/// Fallback renewal period when the lock lifetime cannot be split.
const MIN_RENEW_PERIOD: Duration = Duration::from_secs(1);

/// Decides which sources are due and runs them under their locks.
pub struct Orchestrator {
    ledger: Ledger,
    locks: LockManager,
    config: OrchestratorConfig,
    sources: Vec<SourceEntry>,
    cancel: Arc<watch::Sender<bool>>,
}

impl Orchestrator {
    pub fn new(ledger: Ledger, config: OrchestratorConfig) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            locks: LockManager::new(ledger.clone()),
            ledger,
            config,
            sources: Vec::new(),
            cancel: Arc::new(cancel),
        }
    }

    /// Register a source. A later registration with the same name replaces
    /// the earlier one.
    pub fn with_source(mut self, schedule: SourceSchedule, pipeline: Arc<dyn Pipeline>) -> Self {
        self.sources.retain(|e| e.schedule.source != schedule.source);
        self.sources.push(SourceEntry { schedule, pipeline });
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceSchedule> {
        self.sources.iter().map(|e| &e.schedule)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel.clone(),
        }
    }

    /// Whether `source` is due at `now`.
    pub async fn should_run(&self, source: &str, now: DateTime<Utc>) -> LedgerResult<Eligibility> {
        let entry = self
            .sources
            .iter()
            .find(|e| e.schedule.source == source)
            .ok_or_else(|| LedgerError::Validation(format!("unknown source: {}", source)))?;
        self.eligibility(&entry.schedule, now).await
    }

    async fn eligibility(&self, schedule: &SourceSchedule, now: DateTime<Utc>) -> LedgerResult<Eligibility> {
        check_eligibility(&self.ledger, schedule, &self.config, now).await
    }

    /// Evaluate and run every registered source concurrently.
    pub async fn run_cycle(&self) -> CycleReport {
        let sources = join_all(self.sources.iter().map(|entry| self.run_source(entry))).await;
        let report = CycleReport { sources };
        if report.has_failures() {
            warn!("Cycle finished with failures");
        } else {
            debug!("Cycle finished");
        }
        report
    }

    async fn run_source(&self, entry: &SourceEntry) -> SourceReport {
        let source = entry.schedule.source.clone();
        let outcome = match self.try_run_source(entry).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Source {} errored: {}", source, e);
                SourceOutcome::Errored {
                    error: e.to_string(),
                }
            }
        };
        SourceReport { source, outcome }
    }

    async fn try_run_source(&self, entry: &SourceEntry) -> LedgerResult<SourceOutcome> {
        let source = entry.schedule.source.as_str();
        if *self.cancel.borrow() {
            return Ok(SourceOutcome::Cancelled);
        }

        let eligibility = self.eligibility(&entry.schedule, self.ledger.now()).await?;
        if !eligibility.run {
            info!(
                "Skipping {}: {} (next eligible at {})",
                source, eligibility.reason, eligibility.next_eligible_at
            );
            return Ok(SourceOutcome::Skipped { eligibility });
        }

        let mut lease = match self
            .locks
            .acquire(source, &self.config.owner_id, self.config.lock_max_age)
            .await
        {
            Ok(lease) => lease,
            Err(LedgerError::LockHeld {
                owner_id,
                expires_at,
                ..
            }) => {
                info!("Skipping {}: locked by {} until {}", source, owner_id, expires_at);
                return Ok(SourceOutcome::LockHeld {
                    owner_id,
                    expires_at,
                });
            }
            Err(e) => return Err(e),
        };

        info!("Running {} ({})", source, eligibility.reason);
        let result = self.run_locked(entry, &mut lease).await;

        if let Err(e) = lease.release(&self.locks).await {
            warn!("Failed to release lock for {}: {}", source, e);
        }
        result
    }

    async fn run_locked(&self, entry: &SourceEntry, lease: &mut LockLease) -> LedgerResult<SourceOutcome> {
        let schedule = &entry.schedule;
        let run_id = self.ledger.start_run(&schedule.source).await?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let ctx = RunContext::new(
            self.ledger.clone(),
            run_id.clone(),
            schedule.source.clone(),
            schedule.daily_quota,
            stop_rx,
        );

        let completion = self
            .dispatch(entry.pipeline.clone(), ctx.clone(), &stop_tx, lease)
            .await
            .with_counts(ctx.records_processed(), ctx.records_written());
        self.ledger.finish_run(&run_id, &completion).await?;

        Ok(SourceOutcome::Completed {
            run_id,
            status: completion.status,
            error_summary: completion.error_summary,
            records_processed: completion.records_processed,
            records_written: completion.records_written,
            dedup: ctx.dedup_stats(),
        })
    }

    /// Run the pipeline on its own task so panics and cancellation stay
    /// contained to this source, renewing the lease while it runs.
    ///
    /// Cancellation and a lost lease both signal the pipeline through its
    /// [`RunContext`] first; the task is aborted only if it is still running
    /// after the grace period.
    async fn dispatch(
        &self,
        pipeline: Arc<dyn Pipeline>,
        ctx: RunContext,
        stop: &watch::Sender<bool>,
        lease: &mut LockLease,
    ) -> RunCompletion {
        let mut cancel = self.cancel.subscribe();
        let mut task: PipelineTask = tokio::spawn(async move { pipeline.run(ctx).await });
        let period = self.renew_period();
        let mut renew = interval_at(Instant::now() + period, period);

        let reason = loop {
            tokio::select! {
                joined = &mut task => return completion_for(joined),
                _ = wait_cancelled(&mut cancel) => break "cancelled".to_string(),
                _ = renew.tick() => {
                    match self.locks.renew(lease, self.config.lock_max_age).await {
                        Ok(()) => {}
                        Err(e) if e.is_lock_held() => {
                            warn!("Lost lock for {} mid-run: {}", lease.source(), e);
                            break format!("lock lost: {}", e);
                        }
                        Err(e) => warn!("Failed to renew lock for {}: {}", lease.source(), e),
                    }
                }
            }
        };

        stop.send_replace(true);
        if tokio::time::timeout(self.config.cancel_grace, &mut task).await.is_err() {
            warn!(
                "Pipeline for {} still running {:?} after stop; aborting",
                lease.source(),
                self.config.cancel_grace
            );
            task.abort();
            // Wait for the abort to land so no pipeline call is left in flight.
            let _ = task.await;
        }
        RunCompletion::failed(reason)
    }

    /// A third of the lock lifetime, so two renewals can fail before expiry.
    fn renew_period(&self) -> Duration {
        (self.config.lock_max_age / 3)
            .to_std()
            .ok()
            .filter(|period| !period.is_zero())
            .unwrap_or(MIN_RENEW_PERIOD)
    }
}

fn completion_for(
    joined: Result<Result<PipelineOutcome, PipelineError>, tokio::task::JoinError>,
) -> RunCompletion {
    match joined {
        Ok(Ok(PipelineOutcome::Completed)) => RunCompletion::success(0, 0),
        Ok(Ok(PipelineOutcome::QuotaLimited)) => RunCompletion::quota_limited(0, 0),
        Ok(Err(e)) => RunCompletion::failed(e.to_string()),
        Err(e) if e.is_panic() => {
            RunCompletion::failed(format!("pipeline panicked: {}", panic_message(e.into_panic())))
        }
        Err(e) => RunCompletion::failed(e.to_string()),
    }
}

/// Evaluate `schedule` against the run history recorded in `ledger`.
///
/// `force` short-circuits to [`RunReason::Forced`](super::RunReason::Forced).
pub async fn check_eligibility(
    ledger: &Ledger,
    schedule: &SourceSchedule,
    config: &OrchestratorConfig,
    now: DateTime<Utc>,
) -> LedgerResult<Eligibility> {
    if config.force {
        return Ok(Eligibility::forced(now));
    }
    let last_success = ledger.last_successful_run(&schedule.source).await?;
    let deployed_at = ledger.deployment_started_at().await?;
    Ok(evaluate(
        schedule.cadence,
        last_success,
        deployed_at,
        config.initial_window,
        now,
    ))
}

async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

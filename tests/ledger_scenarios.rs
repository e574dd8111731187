//! End-to-end ledger scenarios
//!
//! Exercises the public API against a real embedded database: concurrent
//! lock and claim races, quota boundaries, dedup outcomes, and full
//! orchestrator cycles driven by a manual clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::Notify;

use corpus_ledger::config::{DedupConfig, LedgerConfig, OrchestratorConfig, SourceSchedule};
use corpus_ledger::coordination::{LockManager, QuotaTracker};
use corpus_ledger::dedup::{DedupEngine, DedupVerdict};
use corpus_ledger::models::{QuotaDecision, ResourceState, RunStatus};
use corpus_ledger::orchestrator::{
    Orchestrator, Pipeline, PipelineError, PipelineOutcome, RunContext, RunReason, SourceOutcome,
};
use corpus_ledger::repository::RetryPolicy;
use corpus_ledger::{Ledger, LedgerError, ManualClock};

async fn open_ledger() -> (Ledger, ManualClock, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
    let config = LedgerConfig::embedded(dir.path().join("scenarios.db")).retry(RetryPolicy::none());
    let ledger = Ledger::connect_with_clock(&config, Arc::new(clock.clone()))
        .await
        .unwrap();
    (ledger, clock, dir)
}

fn words(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i}")).collect()
}

fn orchestrator_config() -> OrchestratorConfig {
    OrchestratorConfig {
        owner_id: "scenario-host:1".to_string(),
        ..OrchestratorConfig::default()
    }
}

// ----------------------------------------------------------------------------
// Ledger backend
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_state_sequence_is_enforced() {
    let (ledger, _clock, _dir) = open_ledger().await;
    let sig = ledger.dedup().signature("some text");

    assert!(ledger.mark_discovered("news", "u1", &json!({"lang": "en"})).await.unwrap());
    assert!(!ledger.mark_discovered("news", "u1", &json!({})).await.unwrap());

    // discovered -> processed skips a step
    assert!(matches!(
        ledger.mark_processed("u1", "h1", &sig).await,
        Err(LedgerError::Validation(_))
    ));
    ledger.mark_fetched("u1").await.unwrap();
    ledger.mark_processed("u1", "h1", &sig).await.unwrap();

    // processed is past the point of failing or refetching
    assert!(matches!(ledger.mark_failed("u1", "late").await, Err(LedgerError::Validation(_))));
    assert!(matches!(ledger.mark_fetched("u1").await, Err(LedgerError::Validation(_))));

    let resource = ledger.get_resource("u1").await.unwrap().unwrap();
    assert_eq!(resource.state, ResourceState::Processed);
    assert_eq!(resource.metadata, json!({"lang": "en"}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_have_one_winner() {
    let (ledger, _clock, _dir) = open_ledger().await;
    ledger.mark_discovered("news", "contested", &json!({})).await.unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.claim_for_processing("contested").await.unwrap() })
        })
        .collect();

    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

// ----------------------------------------------------------------------------
// Locks
// ----------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquirers_exactly_one_wins() {
    let (ledger, _clock, _dir) = open_ledger().await;
    let locks = LockManager::new(ledger);

    let tasks: Vec<_> = (0..12)
        .map(|i| {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .acquire("wikipedia", &format!("worker-{i}"), Duration::hours(1))
                    .await
            })
        })
        .collect();

    let mut leases = Vec::new();
    let mut held = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(lease) => leases.push(lease),
            Err(LedgerError::LockHeld { .. }) => held += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(leases.len(), 1);
    assert_eq!(held, 11);

    let lease = leases.pop().unwrap();
    let winner = lease.owner_id().to_string();
    assert_eq!(locks.holder("wikipedia").await.unwrap().unwrap().owner_id, winner);
    assert!(lease.release(&locks).await.unwrap());
}

#[tokio::test]
async fn test_stale_lock_is_reclaimed_after_61_minutes() {
    let (ledger, clock, _dir) = open_ledger().await;
    let locks = LockManager::new(ledger);

    let lease_a = locks.acquire("news", "A", Duration::hours(1)).await.unwrap();

    clock.advance(Duration::minutes(10));
    match locks.acquire("news", "B", Duration::hours(1)).await {
        Err(LedgerError::LockHeld { owner_id, .. }) => assert_eq!(owner_id, "A"),
        other => panic!("expected LockHeld, got {other:?}"),
    }

    clock.advance(Duration::minutes(51));
    let lease_b = locks.acquire("news", "B", Duration::hours(1)).await.unwrap();
    assert_eq!(lease_b.owner_id(), "B");

    // A's late release must not free B's lock.
    assert!(!lease_a.release(&locks).await.unwrap());
    assert_eq!(locks.holder("news").await.unwrap().unwrap().owner_id, "B");
    lease_b.release(&locks).await.unwrap();
}

// ----------------------------------------------------------------------------
// Quotas
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_quota_boundary_and_rollover() {
    let (ledger, _clock, _dir) = open_ledger().await;
    let quota = QuotaTracker::new(ledger);
    let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

    for i in 1..350 {
        let decision = quota.check_and_increment("news", day, 350, 1).await.unwrap();
        assert!(decision.allowed, "increment {i} denied");
    }
    let last = quota.check_and_increment("news", day, 350, 1).await.unwrap();
    assert_eq!(last, QuotaDecision { allowed: true, remaining: 0 });

    let over = quota.check_and_increment("news", day, 350, 1).await.unwrap();
    assert!(!over.allowed);
    assert_eq!(quota.usage("news", day).await.unwrap().unwrap().records_ingested, 350);

    let next_day = day.succ_opt().unwrap();
    let fresh = quota.check_and_increment("news", next_day, 350, 1).await.unwrap();
    assert_eq!(fresh, QuotaDecision { allowed: true, remaining: 349 });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_stop_at_limit() {
    let (ledger, _clock, _dir) = open_ledger().await;
    let quota = QuotaTracker::new(ledger);
    let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let quota = quota.clone();
            tokio::spawn(async move { quota.check_and_increment("news", day, 10, 1).await })
        })
        .collect();

    let mut allowed = 0;
    for task in tasks {
        if task.await.unwrap().unwrap().allowed {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 10);
    assert_eq!(quota.usage("news", day).await.unwrap().unwrap().records_ingested, 10);
}

// ----------------------------------------------------------------------------
// Dedup
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_three_identical_documents() {
    let (ledger, _clock, _dir) = open_ledger().await;
    let text = words("shared", 80).join(" ");

    let mut verdicts = Vec::new();
    for url in ["a", "b", "c"] {
        ledger.mark_discovered("news", url, &json!({})).await.unwrap();
        ledger.mark_fetched(url).await.unwrap();
        verdicts.push(ledger.process_document(url, &text).await.unwrap());
    }

    assert_eq!(verdicts.iter().filter(|v| !v.is_duplicate()).count(), 1);
    let counts = ledger.count_by_state(Some("news")).await.unwrap();
    assert_eq!(counts.get(ResourceState::Processed), 1);
    assert_eq!(counts.get(ResourceState::Duplicate), 2);
    for url in ["b", "c"] {
        let resource = ledger.get_resource(url).await.unwrap().unwrap();
        assert_eq!(resource.duplicate_of.as_deref(), Some("a"));
    }
}

#[tokio::test]
async fn test_dedup_precision() {
    let (ledger, _clock, _dir) = open_ledger().await;

    let base = words("base", 400);
    let mut near = base.clone();
    near[200] = "edited".to_string();

    // Shares 40 of 400 tokens with the base document.
    let mut far = words("other", 360);
    far.extend(base[..40].iter().cloned());

    for (url, doc) in [("base", &base), ("near", &near), ("far", &far)] {
        ledger.mark_discovered("news", url, &json!({})).await.unwrap();
        ledger.mark_fetched(url).await.unwrap();
        let verdict = ledger.process_document(url, &doc.join(" ")).await.unwrap();
        match url {
            "near" => assert!(
                matches!(verdict, DedupVerdict::NearDuplicate { ref canonical_url, .. } if canonical_url == "base"),
                "near copy not flagged: {verdict:?}"
            ),
            _ => assert_eq!(verdict, DedupVerdict::Unique, "{url} flagged"),
        }
    }
}

#[test]
fn test_signatures_are_deterministic_and_stable() {
    let a = DedupEngine::new(&DedupConfig::default()).unwrap();
    let b = DedupEngine::new(&DedupConfig::default()).unwrap();
    let text = words("token", 300).join(" ");

    let sig = a.signature(&text);
    assert_eq!(sig, b.signature(&text));
    assert_eq!(sig.to_json(), b.signature(&text).to_json());

    let edited = text.replacen("token150", "tokeX150", 1);
    let similarity = sig.jaccard(&a.signature(&edited));
    assert!(similarity < 1.0);
    assert!(similarity > 0.9, "one-character edit dropped similarity to {similarity}");
}

// ----------------------------------------------------------------------------
// Orchestrator
// ----------------------------------------------------------------------------

/// Discovers, fetches and deduplicates a fixed set of documents, reserving
/// quota one record at a time.
struct FixturePipeline {
    docs: Vec<(String, String)>,
}

#[async_trait]
impl Pipeline for FixturePipeline {
    async fn run(&self, ctx: RunContext) -> Result<PipelineOutcome, PipelineError> {
        for (url, _) in &self.docs {
            ctx.ledger()
                .mark_discovered(ctx.source(), url, &json!({"run": ctx.run_id()}))
                .await?;
        }
        while let Some(resource) = ctx.ledger().claim_next(ctx.source()).await? {
            if !ctx.reserve(1).await?.allowed {
                ctx.ledger().release_claim(&resource.url).await?;
                return Ok(PipelineOutcome::QuotaLimited);
            }
            let text = self
                .docs
                .iter()
                .find(|(url, _)| *url == resource.url)
                .map(|(_, text)| text.as_str())
                .ok_or_else(|| anyhow::anyhow!("no fixture for {}", resource.url))?;
            ctx.ledger().mark_fetched(&resource.url).await?;
            if !ctx.process_document(&resource.url, text).await?.is_duplicate() {
                ctx.add_written(1);
            }
        }
        Ok(PipelineOutcome::Completed)
    }
}

struct Panics;

#[async_trait]
impl Pipeline for Panics {
    async fn run(&self, _ctx: RunContext) -> Result<PipelineOutcome, PipelineError> {
        panic!("parser exploded");
    }
}

/// Signals that it started, then never finishes on its own.
struct Hangs {
    started: Arc<Notify>,
    polls: Arc<AtomicUsize>,
}

#[async_trait]
impl Pipeline for Hangs {
    async fn run(&self, _ctx: RunContext) -> Result<PipelineOutcome, PipelineError> {
        self.started.notify_one();
        loop {
            self.polls.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }
}

/// Keeps working until told to stop, then records a checkpoint and returns.
struct WindsDown {
    started: Arc<Notify>,
}

#[async_trait]
impl Pipeline for WindsDown {
    async fn run(&self, ctx: RunContext) -> Result<PipelineOutcome, PipelineError> {
        self.started.notify_one();
        while !ctx.is_cancelled() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        ctx.ledger()
            .mark_discovered(ctx.source(), "https://slow/checkpoint", &json!({}))
            .await?;
        Ok(PipelineOutcome::Completed)
    }
}

/// Runs documents through the ledger as fast as it can, ignoring stops.
struct Busy {
    started: Arc<Notify>,
}

#[async_trait]
impl Pipeline for Busy {
    async fn run(&self, ctx: RunContext) -> Result<PipelineOutcome, PipelineError> {
        self.started.notify_one();
        for i in 0.. {
            let url = format!("https://busy/{i}");
            ctx.ledger().mark_discovered(ctx.source(), &url, &json!({})).await?;
            ctx.ledger().mark_fetched(&url).await?;
            ctx.process_document(&url, &words(&format!("doc{i}w"), 50).join(" "))
                .await?;
        }
        Ok(PipelineOutcome::Completed)
    }
}

/// Runs until the test lets it finish.
struct Waits {
    started: Arc<Notify>,
    finish: Arc<Notify>,
}

#[async_trait]
impl Pipeline for Waits {
    async fn run(&self, _ctx: RunContext) -> Result<PipelineOutcome, PipelineError> {
        self.started.notify_one();
        self.finish.notified().await;
        Ok(PipelineOutcome::Completed)
    }
}

fn fixture_docs() -> Vec<(String, String)> {
    let shared = words("story", 60).join(" ");
    vec![
        ("https://news/1".to_string(), shared.clone()),
        ("https://news/2".to_string(), words("report", 60).join(" ")),
        ("https://news/3".to_string(), shared),
    ]
}

#[tokio::test]
async fn test_cycle_records_run_and_dedup_stats() {
    let (ledger, _clock, _dir) = open_ledger().await;
    let orchestrator = Orchestrator::new(ledger.clone(), orchestrator_config()).with_source(
        SourceSchedule::new("news", Duration::days(1), 100),
        Arc::new(FixturePipeline { docs: fixture_docs() }),
    );

    let report = orchestrator.run_cycle().await;
    assert_eq!(report.exit_code(), 0);

    let run_id = match report.get("news") {
        Some(SourceOutcome::Completed {
            run_id,
            status,
            records_processed,
            records_written,
            dedup,
            ..
        }) => {
            assert_eq!(*status, RunStatus::Success);
            assert_eq!(*records_processed, 3);
            assert_eq!(*records_written, 2);
            assert_eq!(dedup.unique, 2);
            assert_eq!(dedup.exact_duplicates, 1);
            run_id.clone()
        }
        other => panic!("unexpected outcome {other:?}"),
    };

    let run = ledger.get_run(&run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.records_written, 2);
    assert!(ledger.lock_holder("news").await.unwrap().is_none());
    assert_eq!(report.dedup_totals().total(), 3);
}

#[tokio::test]
async fn test_quota_limited_run_is_not_a_failure() {
    let (ledger, _clock, _dir) = open_ledger().await;
    let orchestrator = Orchestrator::new(ledger.clone(), orchestrator_config()).with_source(
        SourceSchedule::new("news", Duration::days(1), 2),
        Arc::new(FixturePipeline { docs: fixture_docs() }),
    );

    let report = orchestrator.run_cycle().await;
    match report.get("news") {
        Some(SourceOutcome::Completed { status, records_processed, .. }) => {
            assert_eq!(*status, RunStatus::QuotaLimited);
            assert_eq!(*records_processed, 2);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(report.exit_code(), 0);

    let counts = ledger.count_by_state(Some("news")).await.unwrap();
    assert_eq!(counts.get(ResourceState::Discovered), 1);
}

#[tokio::test]
async fn test_should_run_12h_and_25h() {
    let (ledger, clock, _dir) = open_ledger().await;
    let orchestrator = Orchestrator::new(ledger.clone(), orchestrator_config()).with_source(
        SourceSchedule::new("bbc", Duration::days(1), 100),
        Arc::new(FixturePipeline { docs: Vec::new() }),
    );

    // Past the initial collection window.
    clock.advance(Duration::days(10));
    let first = orchestrator.should_run("bbc", ledger.now()).await.unwrap();
    assert_eq!(first.reason, RunReason::NeverRun);
    orchestrator.run_cycle().await;

    clock.advance(Duration::hours(12));
    let early = orchestrator.should_run("bbc", ledger.now()).await.unwrap();
    assert!(!early.run);
    assert_eq!(early.reason, RunReason::RefreshNotDue);

    clock.advance(Duration::hours(13));
    let due = orchestrator.should_run("bbc", ledger.now()).await.unwrap();
    assert!(due.run);
    assert_eq!(due.reason, RunReason::CadenceElapsed);
}

#[tokio::test]
async fn test_force_bypasses_cadence_but_not_locks() {
    let (ledger, _clock, _dir) = open_ledger().await;
    let config = OrchestratorConfig {
        force: true,
        ..orchestrator_config()
    };
    let orchestrator = Orchestrator::new(ledger.clone(), config).with_source(
        SourceSchedule::new("news", Duration::days(7), 100),
        Arc::new(FixturePipeline { docs: Vec::new() }),
    );

    orchestrator.run_cycle().await;
    let forced = orchestrator.should_run("news", ledger.now()).await.unwrap();
    assert_eq!(forced.reason, RunReason::Forced);

    let locks = LockManager::new(ledger.clone());
    let other = locks.acquire("news", "other-host:9", Duration::hours(1)).await.unwrap();
    let report = orchestrator.run_cycle().await;
    assert!(matches!(
        report.get("news"),
        Some(SourceOutcome::LockHeld { owner_id, .. }) if owner_id == "other-host:9"
    ));
    assert_eq!(report.exit_code(), 0);
    other.release(&locks).await.unwrap();
}

#[tokio::test]
async fn test_panicking_pipeline_is_contained() {
    let (ledger, _clock, _dir) = open_ledger().await;
    let orchestrator = Orchestrator::new(ledger.clone(), orchestrator_config())
        .with_source(
            SourceSchedule::new("broken", Duration::days(1), 100),
            Arc::new(Panics),
        )
        .with_source(
            SourceSchedule::new("news", Duration::days(1), 100),
            Arc::new(FixturePipeline { docs: fixture_docs() }),
        );

    let report = orchestrator.run_cycle().await;
    assert_eq!(report.exit_code(), 1);

    match report.get("broken") {
        Some(SourceOutcome::Completed { status, error_summary, .. }) => {
            assert_eq!(*status, RunStatus::Failed);
            assert!(error_summary.as_deref().unwrap().contains("parser exploded"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(!report.get("news").unwrap().is_failure());
    assert!(ledger.lock_holder("broken").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancellation_finalizes_run_and_releases_lock() {
    let (ledger, _clock, _dir) = open_ledger().await;
    let started = Arc::new(Notify::new());
    let polls = Arc::new(AtomicUsize::new(0));
    let config = OrchestratorConfig {
        cancel_grace: std::time::Duration::from_millis(50),
        ..orchestrator_config()
    };
    let orchestrator = Orchestrator::new(ledger.clone(), config).with_source(
        SourceSchedule::new("slow", Duration::days(1), 100),
        Arc::new(Hangs {
            started: started.clone(),
            polls: polls.clone(),
        }),
    );
    let cancel = orchestrator.cancel_handle();

    let (report, _) = tokio::join!(orchestrator.run_cycle(), async {
        started.notified().await;
        cancel.cancel();
    });

    match report.get("slow") {
        Some(SourceOutcome::Completed { status, error_summary, run_id, .. }) => {
            assert_eq!(*status, RunStatus::Failed);
            assert_eq!(error_summary.as_deref(), Some("cancelled"));
            let run = ledger.get_run(run_id).await.unwrap().unwrap();
            assert_eq!(run.status, RunStatus::Failed);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(ledger.lock_holder("slow").await.unwrap().is_none());
    assert!(polls.load(Ordering::Relaxed) >= 1);

    // Once cancelled, later cycles start nothing.
    let report = orchestrator.run_cycle().await;
    assert!(matches!(report.get("slow"), Some(SourceOutcome::Cancelled)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_pipeline_winds_down_before_finalizing() {
    let (ledger, _clock, _dir) = open_ledger().await;
    let started = Arc::new(Notify::new());
    let orchestrator = Orchestrator::new(ledger.clone(), orchestrator_config()).with_source(
        SourceSchedule::new("slow", Duration::days(1), 100),
        Arc::new(WindsDown {
            started: started.clone(),
        }),
    );
    let cancel = orchestrator.cancel_handle();

    let (report, _) = tokio::join!(orchestrator.run_cycle(), async {
        started.notified().await;
        cancel.cancel();
    });

    match report.get("slow") {
        Some(SourceOutcome::Completed { status, error_summary, .. }) => {
            assert_eq!(*status, RunStatus::Failed);
            assert_eq!(error_summary.as_deref(), Some("cancelled"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(ledger
        .get_resource("https://slow/checkpoint")
        .await
        .unwrap()
        .is_some());
    assert!(ledger.lock_holder("slow").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abort_mid_write_keeps_finalization_on_disk() {
    let (ledger, _clock, dir) = open_ledger().await;
    let started = Arc::new(Notify::new());
    let config = OrchestratorConfig {
        cancel_grace: std::time::Duration::from_millis(1),
        ..orchestrator_config()
    };
    let orchestrator = Orchestrator::new(ledger.clone(), config).with_source(
        SourceSchedule::new("busy", Duration::days(1), 1_000_000),
        Arc::new(Busy {
            started: started.clone(),
        }),
    );
    let cancel = orchestrator.cancel_handle();

    let (report, _) = tokio::join!(orchestrator.run_cycle(), async {
        started.notified().await;
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        cancel.cancel();
    });
    let run_id = match report.get("busy") {
        Some(SourceOutcome::Completed { status, run_id, .. }) => {
            assert_eq!(*status, RunStatus::Failed);
            run_id.clone()
        }
        other => panic!("unexpected outcome {other:?}"),
    };
    drop(orchestrator);
    drop(ledger);

    let db = rusqlite::Connection::open(dir.path().join("scenarios.db")).unwrap();
    let status: String = db
        .query_row(
            "SELECT status FROM pipeline_runs WHERE run_id = ?1",
            [&run_id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(status, "failed");
    let locks: i64 = db
        .query_row("SELECT COUNT(*) FROM locks", [], |row| row.get(0))
        .unwrap();
    assert_eq!(locks, 0);
}

#[tokio::test]
async fn test_lease_is_renewed_during_long_runs() {
    let (ledger, clock, _dir) = open_ledger().await;
    let started = Arc::new(Notify::new());
    let finish = Arc::new(Notify::new());
    let config = OrchestratorConfig {
        lock_max_age: Duration::milliseconds(300),
        ..orchestrator_config()
    };
    let orchestrator = Orchestrator::new(ledger.clone(), config).with_source(
        SourceSchedule::new("long", Duration::days(1), 100),
        Arc::new(Waits {
            started: started.clone(),
            finish: finish.clone(),
        }),
    );
    let locks = LockManager::new(ledger.clone());

    let (report, intruder) = tokio::join!(orchestrator.run_cycle(), async {
        started.notified().await;
        // Well past the original expiry; only a renewal keeps the lock live.
        clock.advance(Duration::hours(1));
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        let intruder = locks.acquire("long", "intruder:2", Duration::hours(1)).await;
        finish.notify_one();
        intruder
    });

    assert!(matches!(intruder, Err(LedgerError::LockHeld { ref owner_id, .. }) if owner_id == "scenario-host:1"));
    assert!(matches!(
        report.get("long"),
        Some(SourceOutcome::Completed { status: RunStatus::Success, .. })
    ));
    assert!(ledger.lock_holder("long").await.unwrap().is_none());
}

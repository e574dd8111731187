//! The crawl ledger: persistent, concurrency-safe state for the corpus
//! pipelines.
//!
//! A [`Ledger`] is a cheap, cloneable handle over a [`DbPool`]. Operations
//! are grouped by concern in the submodules; each public operation runs
//! through the retry layer with a per-attempt timeout.

mod claim;
mod cleanup;
mod dedup_index;
mod locks;
mod quotas;
mod resources;
mod runs;
mod stats;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::error::LedgerResult;
use super::migrations::run_migrations;
use super::pool::DbPool;
use super::retry::{with_retry, RetryPolicy};
use crate::clock::{Clock, SystemClock};
use crate::config::{BackendKind, LedgerConfig};
use crate::dedup::DedupEngine;

pub use stats::StateCounts;

/// Handle to the ledger backend.
#[derive(Clone)]
pub struct Ledger {
    pool: DbPool,
    retry: RetryPolicy,
    op_timeout: Duration,
    claim_ttl: chrono::Duration,
    dedup: Arc<DedupEngine>,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    /// Migrate the schema, open the backend, and record the deployment time.
    pub async fn connect(config: &LedgerConfig) -> LedgerResult<Self> {
        Self::connect_with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn connect_with_clock(
        config: &LedgerConfig,
        clock: Arc<dyn Clock>,
    ) -> LedgerResult<Self> {
        run_migrations(config).await?;
        let pool = DbPool::connect(config).await?;
        let ledger = Self::from_pool(pool, config, clock)?;
        ledger.deployment_started_at().await?;
        Ok(ledger)
    }

    /// Wrap an already-migrated pool.
    pub fn from_pool(
        pool: DbPool,
        config: &LedgerConfig,
        clock: Arc<dyn Clock>,
    ) -> LedgerResult<Self> {
        Ok(Self {
            pool,
            retry: config.retry,
            op_timeout: config.statement_timeout,
            claim_ttl: config.claim_ttl,
            dedup: Arc::new(DedupEngine::new(&config.dedup)?),
            clock,
        })
    }

    pub fn backend(&self) -> BackendKind {
        self.pool.backend()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn dedup(&self) -> &DedupEngine {
        &self.dedup
    }

    pub fn claim_ttl(&self) -> chrono::Duration {
        self.claim_ttl
    }

    /// Run one backend operation with retries and a per-attempt timeout.
    async fn run<T, F, Fut>(&self, op: &str, f: F) -> LedgerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LedgerResult<T>>,
    {
        with_retry(&self.retry, self.op_timeout, op, f).await
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("backend", &self.backend())
            .field("retry", &self.retry)
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

/// Test helpers shared by the ledger submodules.
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::Ledger;
    use crate::clock::ManualClock;
    use crate::config::LedgerConfig;
    use crate::repository::retry::RetryPolicy;

    pub(crate) fn start_time() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    /// Fresh embedded ledger in a temp dir, driven by a manual clock.
    pub(crate) async fn ledger() -> (Ledger, ManualClock, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(start_time());
        let config = LedgerConfig::embedded(dir.path().join("ledger.db")).retry(RetryPolicy::none());
        let ledger = Ledger::connect_with_clock(&config, Arc::new(clock.clone()))
            .await
            .unwrap();
        (ledger, clock, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::testing;
    use super::*;
    use crate::repository::error::LedgerError;
    use crate::repository::models::NewMeta;
    use crate::schema::ledger_meta;
    use crate::with_conn;
    use diesel_async::scoped_futures::ScopedFutureExt;
    use diesel_async::{AsyncConnection, RunQueryDsl};
    use serde_json::json;

    fn count(db: &rusqlite::Connection, sql: &str) -> i64 {
        db.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[tokio::test]
    async fn test_interrupted_transaction_does_not_swallow_later_writes() {
        let (ledger, _clock, dir) = testing::ledger().await;

        let interrupted = tokio::time::timeout(Duration::from_millis(100), async {
            let result: LedgerResult<()> = with_conn!(ledger.pool, conn => {
                conn.transaction::<_, LedgerError, _>(|conn| {
                    async move {
                        diesel::insert_into(ledger_meta::table)
                            .values(&NewMeta {
                                key: "interrupted",
                                value: "1",
                            })
                            .execute(conn)
                            .await?;
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(())
                    }
                    .scope_boxed()
                })
                .await
            });
            result
        })
        .await;
        assert!(interrupted.is_err());

        assert!(ledger
            .mark_discovered("news", "after", &json!({}))
            .await
            .unwrap());
        ledger.mark_fetched("after").await.unwrap();
        drop(ledger);

        let db = rusqlite::Connection::open(dir.path().join("ledger.db")).unwrap();
        assert_eq!(
            count(&db, "SELECT COUNT(*) FROM crawl_ledger WHERE url = 'after' AND state = 'fetched'"),
            1
        );
        assert_eq!(
            count(&db, "SELECT COUNT(*) FROM ledger_meta WHERE key = 'interrupted'"),
            0
        );
    }
}

//! In-progress claims on resources.
//!
//! A claim is a timestamp in `claimed_at`. Claiming is a single conditional
//! UPDATE, so exactly one of several concurrent callers sees a row change.
//! Claims older than the claim TTL are treated as abandoned.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use tracing::debug;

use super::Ledger;
use crate::models::{Resource, ResourceState};
use crate::repository::error::LedgerResult;
use crate::repository::models::ResourceRecord;
use crate::repository::util::format_ts;
use crate::schema::crawl_ledger;
use crate::with_conn;

fn claimable_states() -> Vec<&'static str> {
    ResourceState::ALL
        .into_iter()
        .filter(ResourceState::is_claimable)
        .map(|s| s.as_str())
        .collect()
}

impl Ledger {
    /// Mark `url` as in progress. Returns `true` for the single winner.
    pub async fn claim_for_processing(&self, url: &str) -> LedgerResult<bool> {
        let claimed = self
            .run("claim_for_processing", || self.try_claim(url))
            .await?;
        if claimed {
            debug!("Claimed {}", url);
        }
        Ok(claimed)
    }

    async fn try_claim(&self, url: &str) -> LedgerResult<bool> {
        let now = self.now();
        let stale_before = format_ts(now - self.claim_ttl);
        let now = format_ts(now);

        let updated = with_conn!(self.pool, conn => {
            diesel::update(
                crawl_ledger::table
                    .filter(crawl_ledger::url.eq(url))
                    .filter(crawl_ledger::state.eq_any(claimable_states()))
                    .filter(
                        crawl_ledger::claimed_at
                            .is_null()
                            .or(crawl_ledger::claimed_at.lt(&stale_before)),
                    ),
            )
            .set((
                crawl_ledger::claimed_at.eq(&now),
                crawl_ledger::updated_at.eq(&now),
            ))
            .execute(conn)
            .await?
        });
        Ok(updated == 1)
    }

    /// Drop the in-progress marker. Releasing an unclaimed URL is a no-op.
    pub async fn release_claim(&self, url: &str) -> LedgerResult<bool> {
        self.run("release_claim", || self.try_release_claim(url))
            .await
    }

    async fn try_release_claim(&self, url: &str) -> LedgerResult<bool> {
        let updated = with_conn!(self.pool, conn => {
            diesel::update(
                crawl_ledger::table
                    .filter(crawl_ledger::url.eq(url))
                    .filter(crawl_ledger::claimed_at.is_not_null()),
            )
            .set(crawl_ledger::claimed_at.eq(None::<String>))
            .execute(conn)
            .await?
        });
        Ok(updated > 0)
    }

    /// Oldest unclaimed `discovered` resources for a source.
    pub async fn pending_resources(&self, source: &str, limit: u32) -> LedgerResult<Vec<Resource>> {
        self.run("pending_resources", || self.try_pending(source, limit))
            .await
    }

    async fn try_pending(&self, source: &str, limit: u32) -> LedgerResult<Vec<Resource>> {
        let stale_before = format_ts(self.now() - self.claim_ttl);
        let records: Vec<ResourceRecord> = with_conn!(self.pool, conn => {
            crawl_ledger::table
                .filter(crawl_ledger::source.eq(source))
                .filter(crawl_ledger::state.eq(ResourceState::Discovered.as_str()))
                .filter(
                    crawl_ledger::claimed_at
                        .is_null()
                        .or(crawl_ledger::claimed_at.lt(&stale_before)),
                )
                .order(crawl_ledger::discovered_at.asc())
                .limit(limit as i64)
                .select(ResourceRecord::as_select())
                .load(conn)
                .await?
        });
        Ok(records.into_iter().map(Resource::from).collect())
    }

    /// Claim the oldest pending resource of a source, if any.
    ///
    /// Losing a race for one candidate moves on to the next.
    pub async fn claim_next(&self, source: &str) -> LedgerResult<Option<Resource>> {
        const BATCH: u32 = 8;
        loop {
            let candidates = self.pending_resources(source, BATCH).await?;
            if candidates.is_empty() {
                return Ok(None);
            }
            for mut candidate in candidates {
                if self.claim_for_processing(&candidate.url).await? {
                    candidate.claimed_at = Some(self.now());
                    return Ok(Some(candidate));
                }
            }
        }
    }
}

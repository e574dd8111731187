//! Retention pass over finished resources.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use tracing::info;

use super::Ledger;
use crate::models::ResourceState;
use crate::repository::error::{LedgerError, LedgerResult};
use crate::repository::util::format_ts;
use crate::schema::{content_hashes, crawl_ledger, lsh_buckets};
use crate::with_conn;

const PURGE_BATCH: i64 = 500;

impl Ledger {
    /// Delete `failed` and `duplicate` resources last updated before
    /// `older_than`, together with their index entries.
    ///
    /// Processed resources are kept: they anchor the dedup indexes.
    pub async fn purge_resources(&self, older_than: DateTime<Utc>) -> LedgerResult<u64> {
        let cutoff = format_ts(older_than);
        let mut total = 0u64;
        loop {
            let purged = self
                .run("purge_resources", || self.try_purge_batch(&cutoff))
                .await?;
            total += purged;
            if purged < PURGE_BATCH as u64 {
                break;
            }
        }
        if total > 0 {
            info!("Purged {} resources last updated before {}", total, cutoff);
        }
        Ok(total)
    }

    async fn try_purge_batch(&self, cutoff: &str) -> LedgerResult<u64> {
        with_conn!(self.pool, conn => {
            conn.transaction::<_, LedgerError, _>(|conn| {
                async move {
                    let urls: Vec<String> = crawl_ledger::table
                        .filter(crawl_ledger::state.eq_any([
                            ResourceState::Failed.as_str(),
                            ResourceState::Duplicate.as_str(),
                        ]))
                        .filter(crawl_ledger::updated_at.lt(cutoff))
                        .select(crawl_ledger::url)
                        .limit(PURGE_BATCH)
                        .load(conn)
                        .await?;
                    if urls.is_empty() {
                        return Ok(0);
                    }

                    diesel::delete(lsh_buckets::table.filter(lsh_buckets::url.eq_any(&urls)))
                        .execute(conn)
                        .await?;
                    diesel::delete(content_hashes::table.filter(content_hashes::url.eq_any(&urls)))
                        .execute(conn)
                        .await?;
                    let deleted = diesel::delete(crawl_ledger::table.filter(crawl_ledger::url.eq_any(&urls)))
                        .execute(conn)
                        .await?;
                    Ok(deleted as u64)
                }
                .scope_boxed()
            })
            .await
        })
    }
}

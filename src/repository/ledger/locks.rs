//! Lock rows: at most one live lock per source.

use chrono::Duration;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use tracing::{debug, info};

use super::Ledger;
use crate::models::LockInfo;
use crate::repository::error::{LedgerError, LedgerResult};
use crate::repository::models::{LockRecord, NewLock};
use crate::repository::parse_datetime;
use crate::repository::util::{checked_after, checked_before, format_ts};
use crate::schema::locks;
use crate::with_conn;

impl Ledger {
    /// Take the lock for `source`, reclaiming it if the current row expired.
    ///
    /// The current owner acquiring again renews its lease. Any other live
    /// owner yields [`LedgerError::LockHeld`], which is never retried.
    pub async fn acquire_lock(
        &self,
        source: &str,
        owner_id: &str,
        max_age: Duration,
    ) -> LedgerResult<LockInfo> {
        self.run("acquire_lock", || self.try_acquire_lock(source, owner_id, max_age))
            .await
    }

    async fn try_acquire_lock(
        &self,
        source: &str,
        owner_id: &str,
        max_age: Duration,
    ) -> LedgerResult<LockInfo> {
        let now = self.now();
        let expires = checked_after(now, max_age)?;
        let acquired_at = format_ts(now);
        let expires_at = format_ts(expires);
        let (acquired_ref, expires_ref) = (acquired_at.as_str(), expires_at.as_str());

        let (reclaimed, renewed) = with_conn!(self.pool, conn => {
            conn.transaction::<_, LedgerError, _>(|conn| {
                async move {
                    let reclaimed = diesel::delete(
                        locks::table
                            .filter(locks::source.eq(source))
                            .filter(locks::expires_at.le(acquired_ref)),
                    )
                    .execute(conn)
                    .await?;

                    let inserted = diesel::insert_into(locks::table)
                        .values(&NewLock {
                            source,
                            owner_id,
                            acquired_at: acquired_ref,
                            expires_at: expires_ref,
                        })
                        .on_conflict(locks::source)
                        .do_nothing()
                        .execute(conn)
                        .await?;
                    if inserted == 1 {
                        return Ok((reclaimed > 0, false));
                    }

                    let holder: Option<LockRecord> = locks::table
                        .find(source)
                        .select(LockRecord::as_select())
                        .first(conn)
                        .await
                        .optional()?;

                    match holder {
                        Some(holder) if holder.owner_id == owner_id => {
                            diesel::update(locks::table.find(source))
                                .set(locks::expires_at.eq(expires_ref))
                                .execute(conn)
                                .await?;
                            Ok((false, true))
                        }
                        Some(holder) => Err(LedgerError::LockHeld {
                            source_name: holder.source,
                            owner_id: holder.owner_id,
                            expires_at: parse_datetime(&holder.expires_at),
                        }),
                        // Released between our insert and read.
                        None => Err(LedgerError::Transient(format!(
                            "lock for {} changed hands during acquire",
                            source
                        ))),
                    }
                }
                .scope_boxed()
            })
            .await?
        });

        if reclaimed {
            info!("Reclaimed expired lock for {} (new owner {})", source, owner_id);
        } else if renewed {
            debug!("Renewed lock for {} held by {}", source, owner_id);
        } else {
            debug!("Acquired lock for {} as {}", source, owner_id);
        }

        Ok(LockInfo {
            source: source.to_string(),
            owner_id: owner_id.to_string(),
            acquired_at: now,
            expires_at: expires,
        })
    }

    /// Delete the lock if `owner_id` holds it. Returns whether a row went away.
    ///
    /// A missing or foreign lock is logged and otherwise ignored.
    pub async fn release_lock(&self, source: &str, owner_id: &str) -> LedgerResult<bool> {
        let removed = self
            .run("release_lock", || self.try_release_lock(source, owner_id))
            .await?;
        if removed {
            debug!("Released lock for {} held by {}", source, owner_id);
        } else {
            info!(
                "Lock for {} was not held by {} at release; nothing to do",
                source, owner_id
            );
        }
        Ok(removed)
    }

    async fn try_release_lock(&self, source: &str, owner_id: &str) -> LedgerResult<bool> {
        let deleted = with_conn!(self.pool, conn => {
            diesel::delete(
                locks::table
                    .filter(locks::source.eq(source))
                    .filter(locks::owner_id.eq(owner_id)),
            )
            .execute(conn)
            .await?
        });
        Ok(deleted > 0)
    }

    /// Remove locks that have expired or are older than `max_age`.
    pub async fn cleanup_stale_locks(&self, max_age: Duration) -> LedgerResult<u64> {
        let removed = self
            .run("cleanup_stale_locks", || self.try_cleanup_stale_locks(max_age))
            .await?;
        if removed > 0 {
            info!("Removed {} stale locks", removed);
        }
        Ok(removed)
    }

    async fn try_cleanup_stale_locks(&self, max_age: Duration) -> LedgerResult<u64> {
        let now = self.now();
        let now_str = format_ts(now);
        let acquired_before = format_ts(checked_before(now, max_age)?);

        let deleted = with_conn!(self.pool, conn => {
            diesel::delete(
                locks::table.filter(
                    locks::expires_at
                        .le(&now_str)
                        .or(locks::acquired_at.le(&acquired_before)),
                ),
            )
            .execute(conn)
            .await?
        });
        Ok(deleted as u64)
    }

    /// Current lock row for `source`, live or expired.
    pub async fn lock_holder(&self, source: &str) -> LedgerResult<Option<LockInfo>> {
        self.run("lock_holder", || self.try_lock_holder(source)).await
    }

    async fn try_lock_holder(&self, source: &str) -> LedgerResult<Option<LockInfo>> {
        let record: Option<LockRecord> = with_conn!(self.pool, conn => {
            locks::table
                .find(source)
                .select(LockRecord::as_select())
                .first(conn)
                .await
                .optional()?
        });
        Ok(record.map(LockInfo::from))
    }

    /// All lock rows, ordered by source.
    pub async fn list_locks(&self) -> LedgerResult<Vec<LockInfo>> {
        self.run("list_locks", || self.try_list_locks()).await
    }

    async fn try_list_locks(&self) -> LedgerResult<Vec<LockInfo>> {
        let records: Vec<LockRecord> = with_conn!(self.pool, conn => {
            locks::table
                .order(locks::source.asc())
                .select(LockRecord::as_select())
                .load(conn)
                .await?
        });
        Ok(records.into_iter().map(LockInfo::from).collect())
    }
}

//! Resource lifecycle operations.

use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use tracing::debug;

use super::Ledger;
use crate::dedup::MinHashSignature;
use crate::models::{ProcessOutcome, Resource, ResourceState};
use crate::repository::error::{LedgerError, LedgerResult};
use crate::repository::models::{NewContentHash, NewLshBucket, NewResource, ResourceRecord};
use crate::repository::util::format_ts;
use crate::schema::{content_hashes, crawl_ledger, lsh_buckets};
use crate::with_conn;

/// Stored names of the states a resource may leave to enter `target`.
pub(super) fn predecessor_names(target: ResourceState) -> Vec<&'static str> {
    target.predecessors().iter().map(|s| s.as_str()).collect()
}

/// Error for a transition whose conditional update matched no row.
pub(super) fn rejected_transition(
    url: &str,
    current: Option<String>,
    target: ResourceState,
) -> LedgerError {
    match current {
        None => LedgerError::Validation(format!("unknown resource {}", url)),
        Some(state) => LedgerError::Validation(format!(
            "illegal transition for {}: {} -> {}",
            url, state, target
        )),
    }
}

impl Ledger {
    /// Record a newly discovered URL. Returns `true` if a row was created.
    ///
    /// Existing rows are never modified, whatever their state or source.
    pub async fn mark_discovered(
        &self,
        source: &str,
        url: &str,
        metadata: &serde_json::Value,
    ) -> LedgerResult<bool> {
        let metadata = serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string());
        self.run("mark_discovered", || {
            self.try_mark_discovered(source, url, &metadata)
        })
        .await
    }

    async fn try_mark_discovered(
        &self,
        source: &str,
        url: &str,
        metadata: &str,
    ) -> LedgerResult<bool> {
        let now = format_ts(self.now());
        let inserted = with_conn!(self.pool, conn => {
            diesel::insert_into(crawl_ledger::table)
                .values(&NewResource {
                    url,
                    source,
                    state: ResourceState::Discovered.as_str(),
                    discovered_at: &now,
                    updated_at: &now,
                    retry_count: 0,
                    metadata,
                })
                .on_conflict(crawl_ledger::url)
                .do_nothing()
                .execute(conn)
                .await?
        });

        if inserted > 0 {
            debug!("Discovered {} for {}", url, source);
        }
        Ok(inserted > 0)
    }

    pub async fn get_resource(&self, url: &str) -> LedgerResult<Option<Resource>> {
        self.run("get_resource", || self.try_get_resource(url)).await
    }

    async fn try_get_resource(&self, url: &str) -> LedgerResult<Option<Resource>> {
        let record: Option<ResourceRecord> = with_conn!(self.pool, conn => {
            crawl_ledger::table
                .find(url)
                .select(ResourceRecord::as_select())
                .first(conn)
                .await
                .optional()?
        });
        Ok(record.map(Resource::from))
    }

    /// `discovered -> fetched`.
    pub async fn mark_fetched(&self, url: &str) -> LedgerResult<()> {
        self.run("mark_fetched", || self.try_mark_fetched(url)).await
    }

    async fn try_mark_fetched(&self, url: &str) -> LedgerResult<()> {
        let now = format_ts(self.now());
        with_conn!(self.pool, conn => {
            let updated = diesel::update(
                crawl_ledger::table
                    .filter(crawl_ledger::url.eq(url))
                    .filter(crawl_ledger::state.eq_any(predecessor_names(ResourceState::Fetched))),
            )
            .set((
                crawl_ledger::state.eq(ResourceState::Fetched.as_str()),
                crawl_ledger::updated_at.eq(&now),
            ))
            .execute(conn)
            .await?;

            if updated == 0 {
                let current: Option<String> = crawl_ledger::table
                    .find(url)
                    .select(crawl_ledger::state)
                    .first(conn)
                    .await
                    .optional()?;
                return Err(rejected_transition(url, current, ResourceState::Fetched));
            }
        });
        debug!("Fetched {}", url);
        Ok(())
    }

    /// `discovered | fetched -> failed`; bumps the retry count and clears
    /// any claim.
    pub async fn mark_failed(&self, url: &str, error: &str) -> LedgerResult<()> {
        self.run("mark_failed", || self.try_mark_failed(url, error))
            .await
    }

    async fn try_mark_failed(&self, url: &str, error: &str) -> LedgerResult<()> {
        let now = format_ts(self.now());
        with_conn!(self.pool, conn => {
            let updated = diesel::update(
                crawl_ledger::table
                    .filter(crawl_ledger::url.eq(url))
                    .filter(crawl_ledger::state.eq_any(predecessor_names(ResourceState::Failed))),
            )
            .set((
                crawl_ledger::state.eq(ResourceState::Failed.as_str()),
                crawl_ledger::retry_count.eq(crawl_ledger::retry_count + 1),
                crawl_ledger::last_error.eq(error),
                crawl_ledger::claimed_at.eq(None::<String>),
                crawl_ledger::updated_at.eq(&now),
            ))
            .execute(conn)
            .await?;

            if updated == 0 {
                let current: Option<String> = crawl_ledger::table
                    .find(url)
                    .select(crawl_ledger::state)
                    .first(conn)
                    .await
                    .optional()?;
                return Err(rejected_transition(url, current, ResourceState::Failed));
            }
        });
        debug!("Failed {}: {}", url, error);
        Ok(())
    }

    /// `fetched -> processed`, or `fetched -> duplicate` when another URL
    /// already owns `text_hash`.
    ///
    /// The hash index insert and the state change commit together, so among
    /// concurrent writers of the same content exactly one becomes canonical.
    pub async fn mark_processed(
        &self,
        url: &str,
        text_hash: &str,
        signature: &MinHashSignature,
    ) -> LedgerResult<ProcessOutcome> {
        let buckets = self.dedup.band_keys(signature)?;
        let signature = signature.to_json();
        let outcome = self
            .run("mark_processed", || {
                self.try_mark_processed(url, text_hash, &signature, &buckets)
            })
            .await?;

        match &outcome {
            ProcessOutcome::Unique => debug!("Processed {}", url),
            ProcessOutcome::Duplicate { canonical_url } => {
                debug!("{} duplicates {}", url, canonical_url)
            }
        }
        Ok(outcome)
    }

    async fn try_mark_processed(
        &self,
        url: &str,
        text_hash: &str,
        signature: &str,
        buckets: &[String],
    ) -> LedgerResult<ProcessOutcome> {
        let now = format_ts(self.now());
        let now = now.as_str();

        with_conn!(self.pool, conn => {
            conn.transaction::<_, LedgerError, _>(|conn| {
                async move {
                    let current: Option<String> = crawl_ledger::table
                        .find(url)
                        .select(crawl_ledger::state)
                        .first(conn)
                        .await
                        .optional()?;
                    if current.as_deref() != Some(ResourceState::Fetched.as_str()) {
                        return Err(rejected_transition(url, current, ResourceState::Processed));
                    }

                    let claimed = diesel::insert_into(content_hashes::table)
                        .values(&NewContentHash {
                            text_hash,
                            url,
                            created_at: now,
                        })
                        .on_conflict(content_hashes::text_hash)
                        .do_nothing()
                        .execute(conn)
                        .await?;

                    if claimed == 0 {
                        let canonical_url: String = content_hashes::table
                            .find(text_hash)
                            .select(content_hashes::url)
                            .first(conn)
                            .await?;

                        if canonical_url != url {
                            diesel::update(crawl_ledger::table.find(url))
                                .set((
                                    crawl_ledger::state.eq(ResourceState::Duplicate.as_str()),
                                    crawl_ledger::text_hash.eq(text_hash),
                                    crawl_ledger::minhash_signature.eq(signature),
                                    crawl_ledger::duplicate_of.eq(&canonical_url),
                                    crawl_ledger::claimed_at.eq(None::<String>),
                                    crawl_ledger::updated_at.eq(now),
                                ))
                                .execute(conn)
                                .await?;
                            return Ok(ProcessOutcome::Duplicate { canonical_url });
                        }
                    }

                    diesel::update(crawl_ledger::table.find(url))
                        .set((
                            crawl_ledger::state.eq(ResourceState::Processed.as_str()),
                            crawl_ledger::text_hash.eq(text_hash),
                            crawl_ledger::minhash_signature.eq(signature),
                            crawl_ledger::claimed_at.eq(None::<String>),
                            crawl_ledger::updated_at.eq(now),
                        ))
                        .execute(conn)
                        .await?;

                    for bucket in buckets {
                        diesel::insert_into(lsh_buckets::table)
                            .values(&NewLshBucket { bucket, url })
                            .on_conflict_do_nothing()
                            .execute(conn)
                            .await?;
                    }

                    Ok(ProcessOutcome::Unique)
                }
                .scope_boxed()
            })
            .await
        })
    }

    /// `fetched | processed -> duplicate` of `canonical_url`.
    ///
    /// Used for verified near-duplicates. A previously canonical resource
    /// hands its hash index entries to `canonical_url` and leaves the LSH
    /// index.
    pub async fn mark_duplicate(
        &self,
        url: &str,
        text_hash: &str,
        signature: &MinHashSignature,
        canonical_url: &str,
    ) -> LedgerResult<()> {
        if url == canonical_url {
            return Err(LedgerError::Validation(format!(
                "{} cannot be a duplicate of itself",
                url
            )));
        }
        let signature = signature.to_json();
        self.run("mark_duplicate", || {
            self.try_mark_duplicate(url, text_hash, &signature, canonical_url)
        })
        .await?;
        debug!("{} marked duplicate of {}", url, canonical_url);
        Ok(())
    }

    async fn try_mark_duplicate(
        &self,
        url: &str,
        text_hash: &str,
        signature: &str,
        canonical_url: &str,
    ) -> LedgerResult<()> {
        let now = format_ts(self.now());
        let now = now.as_str();

        with_conn!(self.pool, conn => {
            conn.transaction::<_, LedgerError, _>(|conn| {
                async move {
                    let current: Option<String> = crawl_ledger::table
                        .find(url)
                        .select(crawl_ledger::state)
                        .first(conn)
                        .await
                        .optional()?;
                    let was_processed =
                        current.as_deref() == Some(ResourceState::Processed.as_str());

                    let updated = diesel::update(
                        crawl_ledger::table
                            .filter(crawl_ledger::url.eq(url))
                            .filter(
                                crawl_ledger::state
                                    .eq_any(predecessor_names(ResourceState::Duplicate)),
                            ),
                    )
                    .set((
                        crawl_ledger::state.eq(ResourceState::Duplicate.as_str()),
                        crawl_ledger::text_hash.eq(text_hash),
                        crawl_ledger::minhash_signature.eq(signature),
                        crawl_ledger::duplicate_of.eq(canonical_url),
                        crawl_ledger::claimed_at.eq(None::<String>),
                        crawl_ledger::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .await?;

                    if updated == 0 {
                        return Err(rejected_transition(url, current, ResourceState::Duplicate));
                    }

                    if was_processed {
                        diesel::update(content_hashes::table.filter(content_hashes::url.eq(url)))
                            .set(content_hashes::url.eq(canonical_url))
                            .execute(conn)
                            .await?;
                        diesel::delete(lsh_buckets::table.filter(lsh_buckets::url.eq(url)))
                            .execute(conn)
                            .await?;
                    }
                    Ok(())
                }
                .scope_boxed()
            })
            .await
        })
    }
}

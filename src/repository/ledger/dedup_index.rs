//! Persistent dedup indexes: the exact hash table and LSH buckets.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use tracing::{debug, warn};

use super::Ledger;
use crate::dedup::{DedupVerdict, MinHashSignature, NearDuplicate};
use crate::models::{ProcessOutcome, ResourceState};
use crate::repository::error::LedgerResult;
use crate::schema::{content_hashes, crawl_ledger, lsh_buckets};
use crate::with_conn;

/// Bind-parameter batch size for `IN (...)` lookups.
const LOOKUP_CHUNK: usize = 500;

impl Ledger {
    /// Whether a document with this hash has already been indexed.
    pub async fn is_duplicate(&self, text_hash: &str) -> LedgerResult<bool> {
        Ok(self.canonical_for_hash(text_hash).await?.is_some())
    }

    /// URL of the canonical document owning `text_hash`.
    pub async fn canonical_for_hash(&self, text_hash: &str) -> LedgerResult<Option<String>> {
        self.run("canonical_for_hash", || self.try_canonical_for_hash(text_hash))
            .await
    }

    async fn try_canonical_for_hash(&self, text_hash: &str) -> LedgerResult<Option<String>> {
        let url = with_conn!(self.pool, conn => {
            content_hashes::table
                .find(text_hash)
                .select(content_hashes::url)
                .first::<String>(conn)
                .await
                .optional()?
        });
        Ok(url)
    }

    /// Processed documents whose estimated similarity to `signature` is at
    /// least `threshold`, most similar first.
    pub async fn find_near_duplicates(
        &self,
        signature: &MinHashSignature,
        threshold: f64,
    ) -> LedgerResult<Vec<NearDuplicate>> {
        let buckets = self.dedup.band_keys(signature)?;
        if buckets.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self
            .run("find_near_duplicates", || self.try_load_candidates(&buckets))
            .await?;

        let candidates = rows.into_iter().filter_map(|(url, stored)| {
            let stored = stored?;
            match MinHashSignature::from_json(&stored) {
                Ok(candidate) => Some((url, candidate)),
                Err(e) => {
                    warn!("Ignoring unreadable signature for {}: {}", url, e);
                    None
                }
            }
        });
        Ok(self.dedup.verify(signature, candidates, threshold))
    }

    async fn try_load_candidates(
        &self,
        buckets: &[String],
    ) -> LedgerResult<Vec<(String, Option<String>)>> {
        with_conn!(self.pool, conn => {
            let mut urls: Vec<String> = lsh_buckets::table
                .filter(lsh_buckets::bucket.eq_any(buckets))
                .select(lsh_buckets::url)
                .distinct()
                .load(conn)
                .await?;
            urls.sort();

            let mut rows: Vec<(String, Option<String>)> = Vec::with_capacity(urls.len());
            for chunk in urls.chunks(LOOKUP_CHUNK) {
                let batch: Vec<(String, Option<String>)> = crawl_ledger::table
                    .filter(crawl_ledger::url.eq_any(chunk))
                    .filter(crawl_ledger::state.eq(ResourceState::Processed.as_str()))
                    .select((crawl_ledger::url, crawl_ledger::minhash_signature))
                    .load(conn)
                    .await?;
                rows.extend(batch);
            }
            Ok(rows)
        })
    }

    /// Run a fetched document through exact then near-duplicate detection
    /// and record the outcome.
    ///
    /// Exact matches and verified near matches leave the resource
    /// `duplicate`; anything else becomes canonical and is indexed.
    pub async fn process_document(&self, url: &str, text: &str) -> LedgerResult<DedupVerdict> {
        let fingerprint = self.dedup.fingerprint(text);

        if !self.is_duplicate(&fingerprint.text_hash).await? {
            let best = self
                .find_near_duplicates(&fingerprint.signature, self.dedup.threshold())
                .await?
                .into_iter()
                .find(|m| m.url != url);

            if let Some(best) = best {
                self.mark_duplicate(url, &fingerprint.text_hash, &fingerprint.signature, &best.url)
                    .await?;
                debug!(
                    "{} is a near duplicate of {} ({:.3})",
                    url, best.url, best.similarity
                );
                return Ok(DedupVerdict::NearDuplicate {
                    canonical_url: best.url,
                    similarity: best.similarity,
                });
            }
        }

        // The hash index settles exact matches atomically, including races
        // with concurrent writers of the same text.
        let outcome = self
            .mark_processed(url, &fingerprint.text_hash, &fingerprint.signature)
            .await?;
        Ok(match outcome {
            ProcessOutcome::Unique => DedupVerdict::Unique,
            ProcessOutcome::Duplicate { canonical_url } => {
                DedupVerdict::ExactDuplicate { canonical_url }
            }
        })
    }
}

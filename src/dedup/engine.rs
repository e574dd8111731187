//! Dedup engine: fingerprints documents and verifies LSH candidates.

use serde::Serialize;

use super::exact::content_hash;
use super::lsh::LshBands;
use super::minhash::{MinHashSignature, MinHasher};
use super::DedupConfigError;
use crate::config::DedupConfig;

/// Exact hash and MinHash signature of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub text_hash: String,
    pub signature: MinHashSignature,
}

/// A verified near-duplicate match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearDuplicate {
    pub url: String,
    /// Estimated Jaccard similarity to the query signature.
    pub similarity: f64,
}

/// What the dedup flow decided for a document.
#[derive(Debug, Clone, PartialEq)]
pub enum DedupVerdict {
    Unique,
    ExactDuplicate { canonical_url: String },
    NearDuplicate { canonical_url: String, similarity: f64 },
}

impl DedupVerdict {
    pub fn is_duplicate(&self) -> bool {
        !matches!(self, Self::Unique)
    }

    pub fn canonical_url(&self) -> Option<&str> {
        match self {
            Self::Unique => None,
            Self::ExactDuplicate { canonical_url } | Self::NearDuplicate { canonical_url, .. } => {
                Some(canonical_url)
            }
        }
    }
}

/// Per-run duplicate counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub unique: u64,
    pub exact_duplicates: u64,
    pub near_duplicates: u64,
}

impl DedupStats {
    pub fn record(&mut self, verdict: &DedupVerdict) {
        match verdict {
            DedupVerdict::Unique => self.unique += 1,
            DedupVerdict::ExactDuplicate { .. } => self.exact_duplicates += 1,
            DedupVerdict::NearDuplicate { .. } => self.near_duplicates += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.unique + self.exact_duplicates + self.near_duplicates
    }

    pub fn merge(&mut self, other: &DedupStats) {
        self.unique += other.unique;
        self.exact_duplicates += other.exact_duplicates;
        self.near_duplicates += other.near_duplicates;
    }
}

/// Pure dedup computations for one validated parameter set.
#[derive(Debug, Clone)]
pub struct DedupEngine {
    hasher: MinHasher,
    bands: LshBands,
    threshold: f64,
}

impl DedupEngine {
    pub fn new(config: &DedupConfig) -> Result<Self, DedupConfigError> {
        config.validate()?;
        Ok(Self {
            hasher: MinHasher::new(config.num_perm, config.shingle_size, config.seed),
            bands: LshBands::new(config.bands, config.rows),
            threshold: config.threshold,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn num_perm(&self) -> usize {
        self.hasher.num_perm()
    }

    pub fn bands(&self) -> &LshBands {
        &self.bands
    }

    pub fn signature(&self, text: &str) -> MinHashSignature {
        self.hasher.signature(text)
    }

    pub fn fingerprint(&self, text: &str) -> Fingerprint {
        Fingerprint {
            text_hash: content_hash(text),
            signature: self.hasher.signature(text),
        }
    }

    pub fn band_keys(&self, signature: &MinHashSignature) -> Result<Vec<String>, DedupConfigError> {
        self.bands.band_keys(signature)
    }

    /// Keep candidates whose estimated similarity reaches `threshold`,
    /// most similar first.
    pub fn verify<I>(
        &self,
        signature: &MinHashSignature,
        candidates: I,
        threshold: f64,
    ) -> Vec<NearDuplicate>
    where
        I: IntoIterator<Item = (String, MinHashSignature)>,
    {
        let mut matches: Vec<NearDuplicate> = candidates
            .into_iter()
            .filter_map(|(url, candidate)| {
                let similarity = signature.jaccard(&candidate);
                (similarity >= threshold).then_some(NearDuplicate { url, similarity })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.url.cmp(&b.url))
        });
        matches
    }
}

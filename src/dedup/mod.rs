//! Exact and near-duplicate detection.
//!
//! Exact duplicates are found by SHA-256 over whitespace-canonicalized text.
//! Near duplicates use MinHash signatures over word shingles, bucketed with
//! banded LSH and verified by estimated Jaccard similarity. Everything in
//! this module is pure; persistence of the indexes lives in the ledger.

mod engine;
mod exact;
mod lsh;
mod minhash;

pub use engine::{DedupEngine, DedupStats, DedupVerdict, Fingerprint, NearDuplicate};
pub use exact::{canonicalize_whitespace, content_hash};
pub use lsh::LshBands;
pub use minhash::{MinHashSignature, MinHasher};

use thiserror::Error;

/// Invalid MinHash / LSH parameters.
#[derive(Debug, Error, PartialEq)]
pub enum DedupConfigError {
    #[error("num_perm must be greater than zero")]
    NoPermutations,
    #[error("shingle_size must be greater than zero")]
    EmptyShingle,
    #[error("bands ({bands}) x rows ({rows}) must equal num_perm ({num_perm})")]
    BandMismatch {
        bands: usize,
        rows: usize,
        num_perm: usize,
    },
    #[error("threshold must be in (0, 1], got {0}")]
    Threshold(f64),
    #[error("signature has {actual} components, expected {expected}")]
    SignatureLength { expected: usize, actual: usize },
}

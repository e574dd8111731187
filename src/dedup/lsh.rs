//! Banded locality-sensitive hashing over MinHash signatures.

use super::minhash::MinHashSignature;
use super::DedupConfigError;

/// Splits signatures into `bands` bands of `rows` components each.
///
/// Two signatures become candidates when any band hashes to the same
/// bucket. With similarity `s` that happens with probability
/// `1 - (1 - s^rows)^bands`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LshBands {
    bands: usize,
    rows: usize,
}

impl LshBands {
    pub fn new(bands: usize, rows: usize) -> Self {
        Self { bands, rows }
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Bucket keys, one per band, formatted as `"{band:03}:{hash}"`.
    ///
    /// Empty documents get no buckets so they never match each other.
    pub fn band_keys(
        &self,
        signature: &MinHashSignature,
    ) -> Result<Vec<String>, DedupConfigError> {
        let expected = self.bands * self.rows;
        if signature.len() != expected {
            return Err(DedupConfigError::SignatureLength {
                expected,
                actual: signature.len(),
            });
        }
        if signature.is_empty_document() {
            return Ok(Vec::new());
        }

        Ok(signature
            .as_slice()
            .chunks(self.rows)
            .enumerate()
            .map(|(band, rows)| {
                let mut hasher = blake3::Hasher::new();
                for value in rows {
                    hasher.update(&value.to_le_bytes());
                }
                let digest = hasher.finalize();
                format!("{:03}:{}", band, hex::encode(&digest.as_bytes()[..8]))
            })
            .collect())
    }

    /// Probability that two documents with Jaccard `similarity` share a bucket.
    pub fn candidate_probability(&self, similarity: f64) -> f64 {
        1.0 - (1.0 - similarity.powi(self.rows as i32)).powi(self.bands as i32)
    }

    /// Similarity at which the candidate probability curve is steepest.
    pub fn approximate_threshold(&self) -> f64 {
        (1.0 / self.bands as f64).powf(1.0 / self.rows as f64)
    }
}

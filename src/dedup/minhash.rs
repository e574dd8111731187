//! MinHash signatures over word shingles.
//!
//! Shingles are runs of `k` lowercased whitespace tokens hashed with BLAKE3.
//! Each permutation is the universal hash `(a*x + b) mod (2^61 - 1)` with
//! coefficients drawn from SplitMix64 of a fixed seed, so signatures are a
//! pure function of (text, parameters).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Mersenne prime 2^61 - 1.
const MERSENNE_PRIME: u64 = (1 << 61) - 1;

/// Component value for permutations that saw no shingle.
const EMPTY_SLOT: u64 = u64::MAX;

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// A fixed-length MinHash signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MinHashSignature(Vec<u64>);

impl MinHashSignature {
    pub fn from_vec(values: Vec<u64>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when the source text produced no shingles.
    pub fn is_empty_document(&self) -> bool {
        self.0.iter().all(|&v| v == EMPTY_SLOT)
    }

    /// Estimated Jaccard similarity: the fraction of equal components.
    ///
    /// Signatures of different lengths, or of empty documents, share nothing.
    pub fn jaccard(&self, other: &MinHashSignature) -> f64 {
        if self.len() != other.len() || self.is_empty_document() || other.is_empty_document() {
            return 0.0;
        }
        let equal = self
            .0
            .iter()
            .zip(other.0.iter())
            .filter(|(a, b)| a == b)
            .count();
        equal as f64 / self.len() as f64
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s).map(Self)
    }
}

/// Computes MinHash signatures for a fixed parameter set.
#[derive(Debug, Clone)]
pub struct MinHasher {
    shingle_size: usize,
    coefficients: Vec<(u64, u64)>,
}

impl MinHasher {
    pub fn new(num_perm: usize, shingle_size: usize, seed: u64) -> Self {
        let mut state = seed;
        let coefficients = (0..num_perm)
            .map(|_| {
                let a = splitmix64(&mut state) % (MERSENNE_PRIME - 1) + 1;
                let b = splitmix64(&mut state) % MERSENNE_PRIME;
                (a, b)
            })
            .collect();
        Self {
            shingle_size,
            coefficients,
        }
    }

    pub fn num_perm(&self) -> usize {
        self.coefficients.len()
    }

    pub fn shingle_size(&self) -> usize {
        self.shingle_size
    }

    /// Hashed word shingles of `text`.
    ///
    /// Texts shorter than one shingle yield a single shingle of all their
    /// tokens; empty texts yield none.
    pub fn shingles(&self, text: &str) -> HashSet<u64> {
        let tokens: Vec<String> = text.split_whitespace().map(|t| t.to_lowercase()).collect();
        if tokens.is_empty() {
            return HashSet::new();
        }
        if tokens.len() < self.shingle_size {
            return std::iter::once(hash_shingle(&tokens)).collect();
        }
        tokens
            .windows(self.shingle_size)
            .map(hash_shingle)
            .collect()
    }

    pub fn signature(&self, text: &str) -> MinHashSignature {
        self.signature_from_shingles(&self.shingles(text))
    }

    pub fn signature_from_shingles(&self, shingles: &HashSet<u64>) -> MinHashSignature {
        let mut values = vec![EMPTY_SLOT; self.coefficients.len()];
        for &shingle in shingles {
            let x = (shingle % MERSENNE_PRIME) as u128;
            for (slot, &(a, b)) in values.iter_mut().zip(self.coefficients.iter()) {
                let permuted = ((a as u128 * x + b as u128) % MERSENNE_PRIME as u128) as u64;
                if permuted < *slot {
                    *slot = permuted;
                }
            }
        }
        MinHashSignature(values)
    }
}

fn hash_shingle(tokens: &[String]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    for token in tokens {
        hasher.update(token.as_bytes());
        hasher.update(b" ");
    }
    let digest = hasher.finalize();
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(buf)
}

//! Exact content hashing.

use sha2::{Digest, Sha256};

/// Collapse every run of whitespace to a single space and trim the ends.
pub fn canonicalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hex SHA-256 of the whitespace-canonicalized text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonicalize_whitespace(text).as_bytes());
    hex::encode(hasher.finalize())
}

//! Resource lifecycle models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dedup::MinHashSignature;

/// Lifecycle state of a ledger resource.
///
/// Transitions only move forward:
/// `discovered -> fetched -> processed`, with `failed` reachable from the
/// first two and `duplicate` from `fetched` or `processed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Discovered,
    Fetched,
    Processed,
    Duplicate,
    Failed,
}

impl ResourceState {
    pub const ALL: [ResourceState; 5] = [
        Self::Discovered,
        Self::Fetched,
        Self::Processed,
        Self::Duplicate,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Fetched => "fetched",
            Self::Processed => "processed",
            Self::Duplicate => "duplicate",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "discovered" => Some(Self::Discovered),
            "fetched" => Some(Self::Fetched),
            "processed" => Some(Self::Processed),
            "duplicate" => Some(Self::Duplicate),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// States from which a resource may move into `self`.
    pub fn predecessors(&self) -> &'static [ResourceState] {
        match self {
            Self::Discovered => &[],
            Self::Fetched => &[Self::Discovered],
            Self::Processed => &[Self::Fetched],
            Self::Duplicate => &[Self::Fetched, Self::Processed],
            Self::Failed => &[Self::Discovered, Self::Fetched],
        }
    }

    pub fn can_transition_to(&self, next: ResourceState) -> bool {
        next.predecessors().contains(self)
    }

    /// Whether a pipeline may still claim the resource for work.
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Discovered | Self::Fetched)
    }
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource tracked by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub url: String,
    pub source: String,
    pub state: ResourceState,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub text_hash: Option<String>,
    pub minhash_signature: Option<MinHashSignature>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub metadata: serde_json::Value,
    /// Set while a worker holds the resource.
    pub claimed_at: Option<DateTime<Utc>>,
    /// Canonical URL when `state` is `duplicate`.
    pub duplicate_of: Option<String>,
}

/// Result of recording a processed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The document's hash was new; it is now the canonical copy.
    Unique,
    /// Another URL already owns the hash; the resource was marked duplicate.
    Duplicate { canonical_url: String },
}

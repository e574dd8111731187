//! Configuration structs for the ledger, dedup engine and orchestrator.
//!
//! These are plain parameter structs with defaults. The binary fills them
//! from command-line arguments and environment variables; library callers
//! build them directly.

use std::path::Path;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use crate::dedup::DedupConfigError;
use crate::repository::retry::RetryPolicy;
use crate::repository::util::is_postgres_url;

/// Default embedded database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "corpus-ledger.db";

/// Default claim TTL in minutes; older claims are treated as abandoned.
pub const DEFAULT_CLAIM_TTL_MINUTES: i64 = 90;

/// Default length of the initial collection window in days.
pub const DEFAULT_INITIAL_WINDOW_DAYS: i64 = 7;

/// Default maximum age of a source lock in minutes.
pub const DEFAULT_LOCK_MAX_AGE_MINUTES: i64 = 120;

/// Default time a cancelled pipeline gets to stop on its own, in seconds.
pub const DEFAULT_CANCEL_GRACE_SECS: u64 = 5;

/// Which storage backend the ledger runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
    /// Single-writer SQLite file.
    Embedded,
    /// Multi-writer PostgreSQL server.
    Networked,
}

impl BackendKind {
    /// Infer the backend from a database URL.
    pub fn from_url(url: &str) -> Self {
        if is_postgres_url(url) {
            BackendKind::Networked
        } else {
            BackendKind::Embedded
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Embedded => "embedded",
            BackendKind::Networked => "networked",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection pool sizing for the networked backend.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_connections: usize,
    pub max_connections: usize,
    /// How long to wait for a free connection before giving up.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// MinHash / LSH parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupConfig {
    /// Number of MinHash permutations (signature length).
    pub num_perm: usize,
    /// Tokens per shingle.
    pub shingle_size: usize,
    pub bands: usize,
    pub rows: usize,
    /// Minimum estimated Jaccard similarity for a near-duplicate.
    pub threshold: f64,
    /// Seed for the permutation coefficients. Changing it invalidates every
    /// stored signature.
    pub seed: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            num_perm: 128,
            shingle_size: 5,
            bands: 32,
            rows: 4,
            threshold: 0.8,
            seed: 0x5eed_c0de_1ed9_e5a1,
        }
    }
}

impl DedupConfig {
    pub fn validate(&self) -> Result<(), DedupConfigError> {
        if self.num_perm == 0 {
            return Err(DedupConfigError::NoPermutations);
        }
        if self.shingle_size == 0 {
            return Err(DedupConfigError::EmptyShingle);
        }
        if self.bands == 0 || self.rows == 0 || self.bands * self.rows != self.num_perm {
            return Err(DedupConfigError::BandMismatch {
                bands: self.bands,
                rows: self.rows,
                num_perm: self.num_perm,
            });
        }
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(DedupConfigError::Threshold(self.threshold));
        }
        Ok(())
    }
}

/// Everything needed to open a [`crate::repository::Ledger`].
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub backend: BackendKind,
    pub database_url: String,
    pub pool: PoolConfig,
    /// Upper bound on a single backend statement (server-side on PostgreSQL,
    /// client-side on both).
    pub statement_timeout: Duration,
    /// SQLite busy handler timeout.
    pub busy_timeout: Duration,
    pub retry: RetryPolicy,
    /// Claims older than this are considered abandoned.
    pub claim_ttl: ChronoDuration,
    pub dedup: DedupConfig,
}

impl LedgerConfig {
    /// Configuration for an embedded database file.
    pub fn embedded(path: impl AsRef<Path>) -> Self {
        Self::with_backend(
            BackendKind::Embedded,
            path.as_ref().display().to_string(),
        )
    }

    /// Configuration for a PostgreSQL server.
    pub fn networked(url: impl Into<String>) -> Self {
        Self::with_backend(BackendKind::Networked, url.into())
    }

    /// Configuration with the backend inferred from the URL scheme.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self::with_backend(BackendKind::from_url(&url), url)
    }

    fn with_backend(backend: BackendKind, database_url: String) -> Self {
        Self {
            backend,
            database_url,
            pool: PoolConfig::default(),
            statement_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            claim_ttl: ChronoDuration::minutes(DEFAULT_CLAIM_TTL_MINUTES),
            dedup: DedupConfig::default(),
        }
    }

    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn claim_ttl(mut self, ttl: ChronoDuration) -> Self {
        self.claim_ttl = ttl;
        self
    }

    pub fn dedup(mut self, dedup: DedupConfig) -> Self {
        self.dedup = dedup;
        self
    }
}

/// Schedule entry for one source.
#[derive(Debug, Clone)]
pub struct SourceSchedule {
    pub source: String,
    /// Minimum time between successful runs once the initial window closes.
    pub cadence: ChronoDuration,
    /// Maximum records ingested per UTC day.
    pub daily_quota: u64,
}

impl SourceSchedule {
    pub fn new(source: impl Into<String>, cadence: ChronoDuration, daily_quota: u64) -> Self {
        Self {
            source: source.into(),
            cadence,
            daily_quota,
        }
    }
}

/// Orchestrator behaviour.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Identity written into lock rows.
    pub owner_id: String,
    /// Lifetime of an acquired lock.
    pub lock_max_age: ChronoDuration,
    /// Period after first deployment during which cadences are capped at a day.
    pub initial_window: ChronoDuration,
    /// Skip cadence checks. Locks and quotas still apply.
    pub force: bool,
    /// How long a cancelled pipeline may keep running to wind down before
    /// its task is aborted.
    pub cancel_grace: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            owner_id: default_owner_id(),
            lock_max_age: ChronoDuration::minutes(DEFAULT_LOCK_MAX_AGE_MINUTES),
            initial_window: ChronoDuration::days(DEFAULT_INITIAL_WINDOW_DAYS),
            force: false,
            cancel_grace: Duration::from_secs(DEFAULT_CANCEL_GRACE_SECS),
        }
    }
}

/// `hostname:pid`, unique per live process.
pub fn default_owner_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}:{}", host, std::process::id())
}

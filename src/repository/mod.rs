//! Repository layer for ledger persistence.
//!
//! All database access uses Diesel ORM through `diesel-async`.
//! Supports both SQLite (embedded) and PostgreSQL (networked) backends.

pub mod error;
pub mod ledger;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod retry;
pub mod util;

pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use ledger::Ledger;
pub use pool::DbPool;
pub use retry::RetryPolicy;

use chrono::{DateTime, Utc};

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

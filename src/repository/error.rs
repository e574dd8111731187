//! Ledger error taxonomy.
//!
//! Callers branch on [`LedgerError::kind`] rather than on individual variants:
//! transient failures are absorbed by the retry layer, scheduling signals
//! (a held lock) are normal outcomes, and everything else is escalated.

use std::time::Duration;

use chrono::{DateTime, Utc};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Coarse classification used for retry and escalation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retried internally with backoff.
    Transient,
    /// Escalated immediately, never retried.
    Permanent,
    /// Illegal state transition or malformed input.
    Validation,
    /// Normal scheduling outcome, not a fault.
    Scheduling,
}

/// Errors from ledger backend operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Transient store error: {0}")]
    Transient(String),
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Permanent store error: {0}")]
    Permanent(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Lock for '{source_name}' is held by '{owner_id}' until {expires_at}")]
    LockHeld {
        source_name: String,
        owner_id: String,
        expires_at: DateTime<Utc>,
    },
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) | Self::Transient(_) | Self::Timeout(_) => ErrorKind::Transient,
            Self::Permanent(_) => ErrorKind::Permanent,
            Self::Validation(_) => ErrorKind::Validation,
            Self::LockHeld { .. } => ErrorKind::Scheduling,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_lock_held(&self) -> bool {
        matches!(self, Self::LockHeld { .. })
    }
}

/// Substrings of backend messages that indicate a conflict worth retrying.
const TRANSIENT_MARKERS: &[&str] = &[
    "database is locked",
    "database table is locked",
    "database is busy",
    "deadlock detected",
    "could not serialize access",
    "canceling statement due to statement timeout",
    "connection reset",
    "connection closed",
    "broken pipe",
];

fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

impl From<DieselError> for LedgerError {
    fn from(e: DieselError) -> Self {
        let message = e.to_string();
        match &e {
            DieselError::DatabaseError(kind, _) => match kind {
                DatabaseErrorKind::SerializationFailure => LedgerError::Transient(message),
                DatabaseErrorKind::ClosedConnection => LedgerError::Connection(message),
                DatabaseErrorKind::UniqueViolation
                | DatabaseErrorKind::ForeignKeyViolation
                | DatabaseErrorKind::NotNullViolation
                | DatabaseErrorKind::CheckViolation => LedgerError::Permanent(message),
                _ if is_transient_message(&message) => LedgerError::Transient(message),
                _ => LedgerError::Permanent(message),
            },
            DieselError::BrokenTransactionManager => LedgerError::Transient(message),
            _ => LedgerError::Permanent(message),
        }
    }
}

impl From<diesel::ConnectionError> for LedgerError {
    fn from(e: diesel::ConnectionError) -> Self {
        LedgerError::Connection(e.to_string())
    }
}

impl From<crate::dedup::DedupConfigError> for LedgerError {
    fn from(e: crate::dedup::DedupConfigError) -> Self {
        LedgerError::Validation(e.to_string())
    }
}

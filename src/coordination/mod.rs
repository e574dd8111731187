//! Cross-process coordination: per-source locks and daily quotas.
//!
//! Both are thin policies over ledger rows, so every process sharing a
//! ledger sees the same locks and counters.

mod locks;
mod quota;

pub use locks::{LockLease, LockManager};
pub use quota::QuotaTracker;

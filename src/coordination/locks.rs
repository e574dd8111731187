//! Lock manager and lease guard.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::models::LockInfo;
use crate::repository::{Ledger, LedgerResult};

/// An acquired source lock. Consumed by [`LockLease::release`].
///
/// If dropped without being released, logs a warning. The row's expiry is
/// the real safety net; the warning is for debugging only.
#[derive(Debug)]
pub struct LockLease {
    info: LockInfo,
    released: bool,
}

impl LockLease {
    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    pub fn source(&self) -> &str {
        &self.info.source
    }

    pub fn owner_id(&self) -> &str {
        &self.info.owner_id
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.info.expires_at
    }

    /// Give the lock back. Returns whether the row was still ours.
    pub async fn release(mut self, manager: &LockManager) -> LedgerResult<bool> {
        self.released = true;
        manager.release(&self.info.source, &self.info.owner_id).await
    }
}

impl Drop for LockLease {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                "Lock lease for {} dropped without release; it expires at {}",
                self.info.source, self.info.expires_at
            );
        }
    }
}

/// Per-source mutual exclusion backed by the ledger's lock table.
#[derive(Clone, Debug)]
pub struct LockManager {
    ledger: Ledger,
}

impl LockManager {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    /// Acquire the lock for `source` for at most `max_age`.
    ///
    /// Fails with `LedgerError::LockHeld` while another owner's lock is live.
    pub async fn acquire(
        &self,
        source: &str,
        owner_id: &str,
        max_age: Duration,
    ) -> LedgerResult<LockLease> {
        let info = self.ledger.acquire_lock(source, owner_id, max_age).await?;
        Ok(LockLease {
            info,
            released: false,
        })
    }

    /// Push the lease's expiry to `max_age` from now.
    ///
    /// Fails with `LedgerError::LockHeld` if the lock expired and another
    /// owner reclaimed it in the meantime.
    pub async fn renew(&self, lease: &mut LockLease, max_age: Duration) -> LedgerResult<()> {
        lease.info = self
            .ledger
            .acquire_lock(&lease.info.source, &lease.info.owner_id, max_age)
            .await?;
        Ok(())
    }

    /// Release by name. Missing or foreign locks are logged, not errors.
    pub async fn release(&self, source: &str, owner_id: &str) -> LedgerResult<bool> {
        self.ledger.release_lock(source, owner_id).await
    }

    pub async fn cleanup_stale_locks(&self, max_age: Duration) -> LedgerResult<u64> {
        self.ledger.cleanup_stale_locks(max_age).await
    }

    pub async fn holder(&self, source: &str) -> LedgerResult<Option<LockInfo>> {
        self.ledger.lock_holder(source).await
    }

    pub async fn list(&self) -> LedgerResult<Vec<LockInfo>> {
        self.ledger.list_locks().await
    }
}

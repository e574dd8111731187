//! Daily quota tracker.

use chrono::NaiveDate;

use crate::models::{QuotaDecision, QuotaUsage};
use crate::repository::{Ledger, LedgerResult};

/// Enforces per-source daily record limits.
///
/// Days are UTC calendar days, so counters roll over at midnight UTC
/// without any reset job.
#[derive(Clone, Debug)]
pub struct QuotaTracker {
    ledger: Ledger,
}

impl QuotaTracker {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    /// Count `n` records against `limit` for `source` on `date` if they fit.
    pub async fn check_and_increment(
        &self,
        source: &str,
        date: NaiveDate,
        limit: u64,
        n: u64,
    ) -> LedgerResult<QuotaDecision> {
        self.ledger.check_and_increment(source, date, limit, n).await
    }

    pub async fn check_and_increment_today(
        &self,
        source: &str,
        limit: u64,
        n: u64,
    ) -> LedgerResult<QuotaDecision> {
        self.ledger.check_and_increment_today(source, limit, n).await
    }

    pub async fn usage(&self, source: &str, date: NaiveDate) -> LedgerResult<Option<QuotaUsage>> {
        self.ledger.quota_usage(source, date).await
    }
}

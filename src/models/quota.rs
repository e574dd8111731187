//! Daily quota models.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Answer to a quota reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaDecision {
    /// Whether the reservation was granted and counted.
    pub allowed: bool,
    /// Records still available today after this decision.
    pub remaining: u64,
}

/// Usage for one source on one UTC day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub date: NaiveDate,
    pub source: String,
    pub records_ingested: u64,
    pub quota_limit: u64,
}

impl QuotaUsage {
    pub fn remaining(&self) -> u64 {
        self.quota_limit.saturating_sub(self.records_ingested)
    }
}

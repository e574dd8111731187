//! Per-source daily ingestion counters.

use chrono::NaiveDate;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use tracing::debug;

use super::Ledger;
use crate::models::{QuotaDecision, QuotaUsage};
use crate::repository::error::{LedgerError, LedgerResult};
use crate::repository::models::{NewQuota, QuotaRecord};
use crate::schema::daily_quotas;
use crate::with_conn;

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn to_i64(value: u64, what: &str) -> LedgerResult<i64> {
    i64::try_from(value).map_err(|_| LedgerError::Validation(format!("{} out of range: {}", what, value)))
}

impl Ledger {
    /// Reserve `n` records of `source`'s allowance for `date`.
    ///
    /// When `count + n <= limit` the count grows by `n`; otherwise nothing
    /// changes and the decision is a denial. Either way `remaining` reflects
    /// the stored count afterwards.
    pub async fn check_and_increment(
        &self,
        source: &str,
        date: NaiveDate,
        limit: u64,
        n: u64,
    ) -> LedgerResult<QuotaDecision> {
        let limit = to_i64(limit, "quota limit")?;
        let n = to_i64(n, "increment")?;
        let date = date_key(date);

        let decision = self
            .run("check_and_increment", || {
                self.try_check_and_increment(source, &date, limit, n)
            })
            .await?;

        if !decision.allowed {
            debug!(
                "Quota denied for {} on {}: {} requested, {} remaining",
                source, date, n, decision.remaining
            );
        }
        Ok(decision)
    }

    async fn try_check_and_increment(
        &self,
        source: &str,
        date: &str,
        limit: i64,
        n: i64,
    ) -> LedgerResult<QuotaDecision> {
        with_conn!(self.pool, conn => {
            conn.transaction::<_, LedgerError, _>(|conn| {
                async move {
                    diesel::insert_into(daily_quotas::table)
                        .values(&NewQuota {
                            quota_date: date,
                            source,
                            records_ingested: 0,
                            quota_limit: limit,
                        })
                        .on_conflict((daily_quotas::quota_date, daily_quotas::source))
                        .do_nothing()
                        .execute(conn)
                        .await?;

                    let updated = diesel::update(
                        daily_quotas::table
                            .filter(daily_quotas::quota_date.eq(date))
                            .filter(daily_quotas::source.eq(source))
                            .filter((daily_quotas::records_ingested + n).le(limit)),
                    )
                    .set((
                        daily_quotas::records_ingested.eq(daily_quotas::records_ingested + n),
                        daily_quotas::quota_limit.eq(limit),
                    ))
                    .execute(conn)
                    .await?;

                    let count: i64 = daily_quotas::table
                        .filter(daily_quotas::quota_date.eq(date))
                        .filter(daily_quotas::source.eq(source))
                        .select(daily_quotas::records_ingested)
                        .first(conn)
                        .await?;

                    Ok(QuotaDecision {
                        allowed: updated == 1,
                        remaining: (limit - count).max(0) as u64,
                    })
                }
                .scope_boxed()
            })
            .await
        })
    }

    /// [`Ledger::check_and_increment`] for the clock's current UTC day.
    pub async fn check_and_increment_today(
        &self,
        source: &str,
        limit: u64,
        n: u64,
    ) -> LedgerResult<QuotaDecision> {
        let today = self.clock.today();
        self.check_and_increment(source, today, limit, n).await
    }

    pub async fn quota_usage(&self, source: &str, date: NaiveDate) -> LedgerResult<Option<QuotaUsage>> {
        let date = date_key(date);
        self.run("quota_usage", || self.try_quota_usage(source, &date))
            .await
    }

    async fn try_quota_usage(&self, source: &str, date: &str) -> LedgerResult<Option<QuotaUsage>> {
        let record: Option<QuotaRecord> = with_conn!(self.pool, conn => {
            daily_quotas::table
                .filter(daily_quotas::quota_date.eq(date))
                .filter(daily_quotas::source.eq(source))
                .select(QuotaRecord::as_select())
                .first(conn)
                .await
                .optional()?
        });
        Ok(record.map(QuotaUsage::from))
    }
}

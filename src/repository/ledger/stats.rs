//! Read-only summaries and ledger metadata.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use tracing::info;

use super::Ledger;
use crate::models::ResourceState;
use crate::repository::error::LedgerResult;
use crate::repository::models::NewMeta;
use crate::repository::parse_datetime;
use crate::repository::util::format_ts;
use crate::schema::{crawl_ledger, ledger_meta};
use crate::with_conn;

const DEPLOYED_AT_KEY: &str = "deployed_at";

/// Resource counts per state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateCounts(BTreeMap<ResourceState, u64>);

impl StateCounts {
    pub fn get(&self, state: ResourceState) -> u64 {
        self.0.get(&state).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceState, u64)> + '_ {
        ResourceState::ALL.into_iter().map(|s| (s, self.get(s)))
    }
}

impl Ledger {
    /// Resource counts by state, across all sources or for one.
    pub async fn count_by_state(&self, source: Option<&str>) -> LedgerResult<StateCounts> {
        self.run("count_by_state", || self.try_count_by_state(source))
            .await
    }

    async fn try_count_by_state(&self, source: Option<&str>) -> LedgerResult<StateCounts> {
        let rows: Vec<(String, i64)> = with_conn!(self.pool, conn => {
            match source {
                Some(source) => crawl_ledger::table
                    .filter(crawl_ledger::source.eq(source))
                    .group_by(crawl_ledger::state)
                    .select((crawl_ledger::state, count_star()))
                    .load(conn)
                    .await?,
                None => crawl_ledger::table
                    .group_by(crawl_ledger::state)
                    .select((crawl_ledger::state, count_star()))
                    .load(conn)
                    .await?,
            }
        });

        let counts = rows
            .into_iter()
            .filter_map(|(state, count)| {
                ResourceState::from_str(&state).map(|s| (s, count.max(0) as u64))
            })
            .collect();
        Ok(StateCounts(counts))
    }

    /// Sources with at least one resource.
    pub async fn list_sources(&self) -> LedgerResult<Vec<String>> {
        self.run("list_sources", || self.try_list_sources()).await
    }

    async fn try_list_sources(&self) -> LedgerResult<Vec<String>> {
        let sources = with_conn!(self.pool, conn => {
            crawl_ledger::table
                .select(crawl_ledger::source)
                .distinct()
                .order(crawl_ledger::source.asc())
                .load::<String>(conn)
                .await?
        });
        Ok(sources)
    }

    /// When this ledger was first deployed. Recorded on first call.
    pub async fn deployment_started_at(&self) -> LedgerResult<DateTime<Utc>> {
        self.run("deployment_started_at", || self.try_deployment_started_at())
            .await
    }

    async fn try_deployment_started_at(&self) -> LedgerResult<DateTime<Utc>> {
        let now = format_ts(self.now());
        let (inserted, value) = with_conn!(self.pool, conn => {
            let inserted = diesel::insert_into(ledger_meta::table)
                .values(&NewMeta {
                    key: DEPLOYED_AT_KEY,
                    value: &now,
                })
                .on_conflict(ledger_meta::key)
                .do_nothing()
                .execute(conn)
                .await?;
            let value: String = ledger_meta::table
                .find(DEPLOYED_AT_KEY)
                .select(ledger_meta::value)
                .first(conn)
                .await?;
            (inserted, value)
        });

        if inserted > 0 {
            info!("Recorded first deployment at {}", value);
        }
        Ok(parse_datetime(&value))
    }
}

//! Diesel row types for ledger tables.
//!
//! Rows are loaded with `as_select()` so the same structs work on both
//! backends. Conversion into domain types lives here as `From` impls.

use diesel::prelude::*;

use super::{parse_datetime, parse_datetime_opt};
use crate::dedup::MinHashSignature;
use crate::models::{LockInfo, PipelineRun, QuotaUsage, Resource, ResourceState, RunStatus};
use crate::schema;

/// Crawl ledger row.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::crawl_ledger)]
pub struct ResourceRecord {
    pub url: String,
    pub source: String,
    pub state: String,
    pub discovered_at: String,
    pub updated_at: String,
    pub text_hash: Option<String>,
    pub minhash_signature: Option<String>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub metadata: String,
    pub claimed_at: Option<String>,
    pub duplicate_of: Option<String>,
}

/// New crawl ledger row, always in the `discovered` state.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::crawl_ledger)]
pub struct NewResource<'a> {
    pub url: &'a str,
    pub source: &'a str,
    pub state: &'a str,
    pub discovered_at: &'a str,
    pub updated_at: &'a str,
    pub retry_count: i32,
    pub metadata: &'a str,
}

impl From<ResourceRecord> for Resource {
    fn from(record: ResourceRecord) -> Self {
        Resource {
            state: ResourceState::from_str(&record.state).unwrap_or(ResourceState::Failed),
            discovered_at: parse_datetime(&record.discovered_at),
            updated_at: parse_datetime(&record.updated_at),
            minhash_signature: record
                .minhash_signature
                .as_deref()
                .and_then(|s| MinHashSignature::from_json(s).ok()),
            retry_count: record.retry_count.max(0) as u32,
            metadata: serde_json::from_str(&record.metadata).unwrap_or_default(),
            claimed_at: parse_datetime_opt(record.claimed_at),
            url: record.url,
            source: record.source,
            text_hash: record.text_hash,
            last_error: record.last_error,
            duplicate_of: record.duplicate_of,
        }
    }
}

/// Source lock row.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::locks)]
pub struct LockRecord {
    pub source: String,
    pub owner_id: String,
    pub acquired_at: String,
    pub expires_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::locks)]
pub struct NewLock<'a> {
    pub source: &'a str,
    pub owner_id: &'a str,
    pub acquired_at: &'a str,
    pub expires_at: &'a str,
}

impl From<LockRecord> for LockInfo {
    fn from(record: LockRecord) -> Self {
        LockInfo {
            acquired_at: parse_datetime(&record.acquired_at),
            expires_at: parse_datetime(&record.expires_at),
            source: record.source,
            owner_id: record.owner_id,
        }
    }
}

/// Daily quota row.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::daily_quotas)]
pub struct QuotaRecord {
    pub quota_date: String,
    pub source: String,
    pub records_ingested: i64,
    pub quota_limit: i64,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::daily_quotas)]
pub struct NewQuota<'a> {
    pub quota_date: &'a str,
    pub source: &'a str,
    pub records_ingested: i64,
    pub quota_limit: i64,
}

impl From<QuotaRecord> for QuotaUsage {
    fn from(record: QuotaRecord) -> Self {
        QuotaUsage {
            date: chrono::NaiveDate::parse_from_str(&record.quota_date, "%Y-%m-%d")
                .unwrap_or_default(),
            source: record.source,
            records_ingested: record.records_ingested.max(0) as u64,
            quota_limit: record.quota_limit.max(0) as u64,
        }
    }
}

/// Pipeline run row.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::pipeline_runs)]
pub struct RunRecord {
    pub run_id: String,
    pub source: String,
    pub status: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub records_processed: i64,
    pub records_written: i64,
    pub error_summary: Option<String>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::pipeline_runs)]
pub struct NewRun<'a> {
    pub run_id: &'a str,
    pub source: &'a str,
    pub status: &'a str,
    pub start_time: &'a str,
    pub records_processed: i64,
    pub records_written: i64,
}

impl From<RunRecord> for PipelineRun {
    fn from(record: RunRecord) -> Self {
        PipelineRun {
            status: RunStatus::from_str(&record.status).unwrap_or(RunStatus::Failed),
            start_time: parse_datetime(&record.start_time),
            end_time: parse_datetime_opt(record.end_time),
            records_processed: record.records_processed.max(0) as u64,
            records_written: record.records_written.max(0) as u64,
            run_id: record.run_id,
            source: record.source,
            error_summary: record.error_summary,
        }
    }
}

/// Exact-hash index entry.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::content_hashes)]
pub struct NewContentHash<'a> {
    pub text_hash: &'a str,
    pub url: &'a str,
    pub created_at: &'a str,
}

/// LSH band bucket entry.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::lsh_buckets)]
pub struct NewLshBucket<'a> {
    pub bucket: &'a str,
    pub url: &'a str,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::ledger_meta)]
pub struct NewMeta<'a> {
    pub key: &'a str,
    pub value: &'a str,
}

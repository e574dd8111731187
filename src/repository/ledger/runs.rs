//! Pipeline run records.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use tracing::{info, warn};
use uuid::Uuid;

use super::Ledger;
use crate::models::{PipelineRun, RunCompletion, RunStatus};
use crate::repository::error::{LedgerError, LedgerResult};
use crate::repository::models::{NewRun, RunRecord};
use crate::repository::parse_datetime_opt;
use crate::repository::util::{checked_before, format_ts};
use crate::schema::pipeline_runs;
use crate::with_conn;

impl Ledger {
    /// Open a `running` record for `source` and return its run id.
    pub async fn start_run(&self, source: &str) -> LedgerResult<String> {
        let run_id = Uuid::new_v4().to_string();
        self.run("start_run", || self.try_start_run(&run_id, source))
            .await?;
        info!("Started run {} for {}", run_id, source);
        Ok(run_id)
    }

    async fn try_start_run(&self, run_id: &str, source: &str) -> LedgerResult<()> {
        let now = format_ts(self.now());
        with_conn!(self.pool, conn => {
            diesel::insert_into(pipeline_runs::table)
                .values(&NewRun {
                    run_id,
                    source,
                    status: RunStatus::Running.as_str(),
                    start_time: &now,
                    records_processed: 0,
                    records_written: 0,
                })
                .on_conflict(pipeline_runs::run_id)
                .do_nothing()
                .execute(conn)
                .await?;
        });
        Ok(())
    }

    /// Write the final status of a run. A run can be finalized only once.
    pub async fn finish_run(&self, run_id: &str, completion: &RunCompletion) -> LedgerResult<()> {
        if !completion.status.is_final() {
            return Err(LedgerError::Validation(format!(
                "run {} cannot be finished with status {}",
                run_id, completion.status
            )));
        }
        let processed = i64::try_from(completion.records_processed).unwrap_or(i64::MAX);
        let written = i64::try_from(completion.records_written).unwrap_or(i64::MAX);

        self.run("finish_run", || {
            self.try_finish_run(run_id, completion, processed, written)
        })
        .await?;

        match completion.status {
            RunStatus::Failed => warn!(
                "Run {} failed: {}",
                run_id,
                completion.error_summary.as_deref().unwrap_or("unknown error")
            ),
            status => info!(
                "Run {} finished as {} ({} processed, {} written)",
                run_id, status, completion.records_processed, completion.records_written
            ),
        }
        Ok(())
    }

    async fn try_finish_run(
        &self,
        run_id: &str,
        completion: &RunCompletion,
        processed: i64,
        written: i64,
    ) -> LedgerResult<()> {
        let now = format_ts(self.now());
        with_conn!(self.pool, conn => {
            let updated = diesel::update(
                pipeline_runs::table
                    .filter(pipeline_runs::run_id.eq(run_id))
                    .filter(pipeline_runs::status.eq(RunStatus::Running.as_str())),
            )
            .set((
                pipeline_runs::status.eq(completion.status.as_str()),
                pipeline_runs::end_time.eq(&now),
                pipeline_runs::records_processed.eq(processed),
                pipeline_runs::records_written.eq(written),
                pipeline_runs::error_summary.eq(completion.error_summary.as_deref()),
            ))
            .execute(conn)
            .await?;

            if updated == 0 {
                return Err(LedgerError::Validation(format!(
                    "run {} is unknown or already finalized",
                    run_id
                )));
            }
        });
        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> LedgerResult<Option<PipelineRun>> {
        self.run("get_run", || self.try_get_run(run_id)).await
    }

    async fn try_get_run(&self, run_id: &str) -> LedgerResult<Option<PipelineRun>> {
        let record: Option<RunRecord> = with_conn!(self.pool, conn => {
            pipeline_runs::table
                .find(run_id)
                .select(RunRecord::as_select())
                .first(conn)
                .await
                .optional()?
        });
        Ok(record.map(PipelineRun::from))
    }

    /// End time of the latest successful run of `source`.
    pub async fn last_successful_run(&self, source: &str) -> LedgerResult<Option<DateTime<Utc>>> {
        self.run("last_successful_run", || self.try_last_successful_run(source))
            .await
    }

    async fn try_last_successful_run(&self, source: &str) -> LedgerResult<Option<DateTime<Utc>>> {
        let end_time: Option<Option<String>> = with_conn!(self.pool, conn => {
            pipeline_runs::table
                .filter(pipeline_runs::source.eq(source))
                .filter(pipeline_runs::status.eq(RunStatus::Success.as_str()))
                .order(pipeline_runs::end_time.desc())
                .select(pipeline_runs::end_time)
                .first(conn)
                .await
                .optional()?
        });
        Ok(parse_datetime_opt(end_time.flatten()))
    }

    /// Most recent runs first, optionally for one source.
    pub async fn recent_runs(&self, source: Option<&str>, limit: u32) -> LedgerResult<Vec<PipelineRun>> {
        self.run("recent_runs", || self.try_recent_runs(source, limit))
            .await
    }

    async fn try_recent_runs(&self, source: Option<&str>, limit: u32) -> LedgerResult<Vec<PipelineRun>> {
        let records: Vec<RunRecord> = with_conn!(self.pool, conn => {
            let mut query = pipeline_runs::table
                .order(pipeline_runs::start_time.desc())
                .limit(limit as i64)
                .select(RunRecord::as_select())
                .into_boxed();
            if let Some(source) = source {
                query = query.filter(pipeline_runs::source.eq(source));
            }
            query.load(conn).await?
        });
        Ok(records.into_iter().map(PipelineRun::from).collect())
    }

    /// Fail runs left `running` for longer than `older_than`, such as those
    /// of a crashed process. Returns how many were closed.
    pub async fn abandon_stale_runs(&self, older_than: Duration) -> LedgerResult<u64> {
        let closed = self
            .run("abandon_stale_runs", || self.try_abandon_stale_runs(older_than))
            .await?;
        if closed > 0 {
            warn!("Marked {} abandoned runs as failed", closed);
        }
        Ok(closed)
    }

    async fn try_abandon_stale_runs(&self, older_than: Duration) -> LedgerResult<u64> {
        let now = self.now();
        let cutoff = format_ts(checked_before(now, older_than)?);
        let now = format_ts(now);
        let updated = with_conn!(self.pool, conn => {
            diesel::update(
                pipeline_runs::table
                    .filter(pipeline_runs::status.eq(RunStatus::Running.as_str()))
                    .filter(pipeline_runs::start_time.lt(&cutoff)),
            )
            .set((
                pipeline_runs::status.eq(RunStatus::Failed.as_str()),
                pipeline_runs::end_time.eq(&now),
                pipeline_runs::error_summary.eq("abandoned"),
            ))
            .execute(conn)
            .await?
        });
        Ok(updated as u64)
    }
}

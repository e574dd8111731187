use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0002_coordination")
        .depends_on(&["0001_ledger"])
        .operation(
            CreateTable::new("locks")
                .add_field(Field::new("source", FieldType::Text).primary_key())
                .add_field(Field::new("owner_id", FieldType::Text).not_null())
                .add_field(Field::new("acquired_at", FieldType::Text).not_null())
                .add_field(Field::new("expires_at", FieldType::Text).not_null()),
        )
        // daily_quotas - composite key, written by hand per backend
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE daily_quotas (
    quota_date TEXT NOT NULL,
    source TEXT NOT NULL,
    records_ingested INTEGER NOT NULL DEFAULT 0,
    quota_limit INTEGER NOT NULL,
    PRIMARY KEY (quota_date, source)
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE daily_quotas (
    quota_date TEXT NOT NULL,
    source TEXT NOT NULL,
    records_ingested BIGINT NOT NULL DEFAULT 0,
    quota_limit BIGINT NOT NULL,
    PRIMARY KEY (quota_date, source)
)"#,
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE pipeline_runs (
    run_id TEXT PRIMARY KEY NOT NULL,
    source TEXT NOT NULL,
    status TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT,
    records_processed INTEGER NOT NULL DEFAULT 0,
    records_written INTEGER NOT NULL DEFAULT 0,
    error_summary TEXT
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE pipeline_runs (
    run_id TEXT PRIMARY KEY NOT NULL,
    source TEXT NOT NULL,
    status TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT,
    records_processed BIGINT NOT NULL DEFAULT 0,
    records_written BIGINT NOT NULL DEFAULT 0,
    error_summary TEXT
)"#,
                ),
        )
        .operation(AddIndex::new(
            "pipeline_runs",
            Index::new("idx_pipeline_runs_source_status")
                .column("source")
                .column("status"),
        ))
        .operation(AddIndex::new(
            "pipeline_runs",
            Index::new("idx_pipeline_runs_start_time").column("start_time"),
        ))
}

//! Schema migrations using cetane.
//!
//! Migrations run on a dedicated raw connection before the ledger pool is
//! opened: rusqlite on a blocking task for the embedded backend, and
//! tokio-postgres for the networked backend.

use cetane::migrator::{MigrationStateStore, Migrator};
use tracing::info;

use super::error::{LedgerError, LedgerResult};
use crate::config::{BackendKind, LedgerConfig};

/// Apply pending migrations and return the names that were applied.
pub async fn run_migrations(config: &LedgerConfig) -> LedgerResult<Vec<String>> {
    let applied = match config.backend {
        BackendKind::Embedded => run_sqlite_migrations(&config.database_url).await?,
        BackendKind::Networked => run_networked_migrations(&config.database_url).await?,
    };

    for name in &applied {
        info!("Applied migration: {}", name);
    }
    if applied.is_empty() {
        info!("No pending migrations");
    }
    Ok(applied)
}

fn migration_error(msg: impl std::fmt::Display) -> LedgerError {
    LedgerError::Permanent(format!("migration failed: {}", msg))
}

async fn run_sqlite_migrations(database_url: &str) -> LedgerResult<Vec<String>> {
    use cetane::backend::Sqlite;

    let path = super::pool::sqlite_path(database_url).to_string();

    tokio::task::spawn_blocking(move || {
        let conn = rusqlite::Connection::open(&path).map_err(migration_error)?;
        conn.busy_timeout(std::time::Duration::from_secs(30))
            .map_err(migration_error)?;

        let backend = Sqlite;
        let registry = crate::migrations::registry();
        let state = SqliteState::new(&conn)?;

        let mut migrator = Migrator::new(&registry, &backend, state);
        migrator
            .migrate_forward(|sql| conn.execute_batch(sql).map_err(|e| e.to_string()))
            .map(|applied| applied.into_iter().map(|name| name.to_string()).collect())
            .map_err(migration_error)
    })
    .await
    .map_err(migration_error)?
}

#[cfg(not(feature = "postgres"))]
async fn run_networked_migrations(_database_url: &str) -> LedgerResult<Vec<String>> {
    Err(LedgerError::Permanent(
        "networked backend requires building with the `postgres` feature".to_string(),
    ))
}

#[cfg(feature = "postgres")]
async fn run_networked_migrations(database_url: &str) -> LedgerResult<Vec<String>> {
    use cetane::backend::Postgres;

    let (client, connection) = tokio_postgres::connect(database_url, tokio_postgres::NoTls)
        .await
        .map_err(|e| LedgerError::Connection(super::util::pg_error_message(&e)))?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::warn!("Migration connection closed with error: {}", e);
        }
    });

    let backend = Postgres;
    let registry = crate::migrations::registry();
    let state = PostgresState::new(&client).await?;

    let mut migrator = Migrator::new(&registry, &backend, state);
    migrator
        .migrate_forward(|sql| {
            // The migrator is synchronous; drive the async client from a scoped thread.
            let rt = tokio::runtime::Handle::current();
            std::thread::scope(|s| {
                s.spawn(|| {
                    rt.block_on(async {
                        client
                            .batch_execute(sql)
                            .await
                            .map_err(|e| super::util::pg_error_message(&e))
                    })
                })
                .join()
                .map_err(|_| "thread panicked".to_string())?
            })
        })
        .map(|applied| applied.into_iter().map(|name| name.to_string()).collect())
        .map_err(migration_error)
}

// -- SQLite state store --

struct SqliteState<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> SqliteState<'a> {
    fn new(conn: &'a rusqlite::Connection) -> LedgerResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS __cetane_migrations (
                name TEXT PRIMARY KEY NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .map_err(migration_error)?;

        Ok(Self { conn })
    }
}

impl MigrationStateStore for SqliteState<'_> {
    fn applied_migrations(&mut self) -> Result<Vec<String>, String> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM __cetane_migrations ORDER BY name")
            .map_err(|e| e.to_string())?;

        let names = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| e.to_string())?
            .collect::<Result<Vec<String>, _>>()
            .map_err(|e| e.to_string())?;

        Ok(names)
    }

    fn mark_applied(&mut self, name: &str) -> Result<(), String> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO __cetane_migrations (name) VALUES (?1)",
                [name],
            )
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn mark_unapplied(&mut self, name: &str) -> Result<(), String> {
        self.conn
            .execute("DELETE FROM __cetane_migrations WHERE name = ?1", [name])
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

// -- PostgreSQL state store --

#[cfg(feature = "postgres")]
struct PostgresState<'a> {
    client: &'a tokio_postgres::Client,
    applied: Vec<String>,
}

#[cfg(feature = "postgres")]
impl<'a> PostgresState<'a> {
    async fn new(client: &'a tokio_postgres::Client) -> LedgerResult<Self> {
        client
            .execute(
                "CREATE TABLE IF NOT EXISTS __cetane_migrations (
                    name TEXT PRIMARY KEY NOT NULL,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
                &[],
            )
            .await
            .map_err(|e| migration_error(super::util::pg_error_message(&e)))?;

        let rows = client
            .query("SELECT name FROM __cetane_migrations ORDER BY name", &[])
            .await
            .map_err(|e| migration_error(super::util::pg_error_message(&e)))?;

        let applied = rows.iter().map(|r| r.get::<_, String>(0)).collect();

        Ok(Self { client, applied })
    }

    fn execute_blocking(&self, sql: &str, name: &str) -> Result<(), String> {
        let rt = tokio::runtime::Handle::current();
        std::thread::scope(|s| {
            s.spawn(|| {
                rt.block_on(async {
                    self.client
                        .execute(sql, &[&name])
                        .await
                        .map_err(|e| super::util::pg_error_message(&e))?;
                    Ok::<(), String>(())
                })
            })
            .join()
            .map_err(|_| "thread panicked".to_string())?
        })
    }
}

#[cfg(feature = "postgres")]
impl MigrationStateStore for PostgresState<'_> {
    fn applied_migrations(&mut self) -> Result<Vec<String>, String> {
        Ok(self.applied.clone())
    }

    fn mark_applied(&mut self, name: &str) -> Result<(), String> {
        self.execute_blocking(
            "INSERT INTO __cetane_migrations (name) VALUES ($1) ON CONFLICT DO NOTHING",
            name,
        )?;
        if !self.applied.iter().any(|n| n == name) {
            self.applied.push(name.to_string());
        }
        Ok(())
    }

    fn mark_unapplied(&mut self, name: &str) -> Result<(), String> {
        self.execute_blocking("DELETE FROM __cetane_migrations WHERE name = $1", name)?;
        self.applied.retain(|n| n != name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sqlite_migrations_are_idempotent() {
        let dir = tempdir().unwrap();
        let config = LedgerConfig::embedded(dir.path().join("ledger.db"));

        let mut first = run_migrations(&config).await.unwrap();
        first.sort();
        assert_eq!(
            first,
            vec!["0001_ledger", "0002_coordination", "0003_dedup_index"]
        );

        let second = run_migrations(&config).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_migrations_create_tables() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        run_migrations(&LedgerConfig::embedded(&path)).await.unwrap();

        let conn = rusqlite::Connection::open(&path).unwrap();
        for table in [
            "crawl_ledger",
            "locks",
            "daily_quotas",
            "pipeline_runs",
            "content_hashes",
            "lsh_buckets",
            "ledger_meta",
        ] {
            let exists: bool = conn
                .query_row(
                    "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert!(exists, "missing table {table}");
        }
    }
}

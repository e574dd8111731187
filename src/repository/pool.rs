//! Connection management for the two ledger backends.
//!
//! The backend is chosen once, from an explicit [`BackendKind`], when the
//! pool is built. Queries are written once against the Diesel DSL and
//! dispatched to whichever connection type is live via [`with_conn!`].
//!
//! The embedded backend keeps a single connection behind an async mutex and
//! takes an exclusive lock on the database file, so exactly one process can
//! write to it. The networked backend uses a deadpool-managed pool of
//! PostgreSQL connections with a server-side statement timeout.

use std::sync::Arc;
use std::time::Duration;

use diesel::sqlite::SqliteConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, SimpleAsyncConnection};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

#[cfg(feature = "postgres")]
use diesel_async::pooled_connection::deadpool::Pool as DeadPool;
#[cfg(feature = "postgres")]
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
#[cfg(feature = "postgres")]
use diesel_async::AsyncPgConnection;

use super::error::{LedgerError, LedgerResult};
use crate::config::{BackendKind, LedgerConfig};

/// Async SQLite connection type.
pub type SqliteConn = SyncConnectionWrapper<SqliteConnection>;

/// Async PostgreSQL connection type.
#[cfg(feature = "postgres")]
pub type PgConn = deadpool::managed::Object<AsyncDieselConnectionManager<AsyncPgConnection>>;

/// Strip the optional `sqlite:` scheme from an embedded database URL.
pub fn sqlite_path(database_url: &str) -> &str {
    database_url.strip_prefix("sqlite:").unwrap_or(database_url)
}

/// The shared embedded connection and whether an operation holds it.
struct SqliteSlot {
    conn: Option<SqliteConn>,
    in_use: bool,
}

/// Embedded backend: one exclusive connection per process.
#[derive(Clone)]
pub struct SqlitePool {
    slot: Arc<Mutex<SqliteSlot>>,
    path: String,
    busy_timeout: Duration,
}

impl SqlitePool {
    /// Open the database file and take the process-wide exclusive lock.
    ///
    /// Fails with a transient error if another process already holds the
    /// file and does not let go within `busy_timeout`.
    pub async fn open(database_url: &str, busy_timeout: Duration) -> LedgerResult<Self> {
        let path = sqlite_path(database_url).to_string();
        let conn = Self::establish(&path, busy_timeout).await?;
        debug!("Opened embedded ledger at {} with exclusive lock", path);

        Ok(Self {
            slot: Arc::new(Mutex::new(SqliteSlot {
                conn: Some(conn),
                in_use: false,
            })),
            path,
            busy_timeout,
        })
    }

    async fn establish(path: &str, busy_timeout: Duration) -> LedgerResult<SqliteConn> {
        let mut conn = SqliteConn::establish(path).await?;
        conn.batch_execute(&format!(
            "PRAGMA locking_mode = EXCLUSIVE;
             PRAGMA busy_timeout = {};
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
            busy_timeout.as_millis()
        ))
        .await?;

        // In exclusive locking mode the lock taken here is kept until close.
        conn.batch_execute("BEGIN EXCLUSIVE; COMMIT;").await?;
        Ok(conn)
    }

    /// Wait for the shared connection and check it out for one operation.
    ///
    /// A connection still marked in use was abandoned mid-operation, possibly
    /// inside an open transaction. It is closed, which rolls that transaction
    /// back, and a fresh connection takes its place.
    pub async fn get(&self) -> LedgerResult<SqliteCheckout> {
        let mut slot = self.slot.clone().lock_owned().await;
        if slot.in_use {
            warn!(
                "Embedded connection to {} was abandoned mid-operation; reopening",
                self.path
            );
            slot.conn = None;
            slot.in_use = false;
        }
        if slot.conn.is_none() {
            slot.conn = Some(Self::establish(&self.path, self.busy_timeout).await?);
        }
        slot.in_use = true;
        Ok(SqliteCheckout { slot })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Exclusive use of the embedded connection for one operation.
///
/// Dropping a checkout without [`SqliteCheckout::finish`] leaves the
/// connection marked in use, so the next checkout replaces it.
pub struct SqliteCheckout {
    slot: OwnedMutexGuard<SqliteSlot>,
}

impl SqliteCheckout {
    pub fn conn(&mut self) -> LedgerResult<&mut SqliteConn> {
        self.slot
            .conn
            .as_mut()
            .ok_or_else(|| LedgerError::Connection("embedded connection is closed".to_string()))
    }

    /// Hand the connection back in a known state.
    pub fn finish(mut self) {
        self.slot.in_use = false;
    }
}

/// Networked backend: deadpool-managed PostgreSQL connections.
#[cfg(feature = "postgres")]
#[derive(Clone)]
pub struct PgPool {
    pool: DeadPool<AsyncPgConnection>,
}

#[cfg(feature = "postgres")]
impl PgPool {
    /// Build the pool and warm `min_connections` connections.
    pub async fn connect(config: &LedgerConfig) -> LedgerResult<Self> {
        let url = super::util::with_statement_timeout(&config.database_url, config.statement_timeout);
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(url);
        let pool = DeadPool::builder(manager)
            .max_size(config.pool.max_connections)
            .wait_timeout(Some(config.pool.acquire_timeout))
            .create_timeout(Some(config.pool.acquire_timeout))
            .runtime(deadpool::Runtime::Tokio1)
            .build()
            .map_err(|e| LedgerError::Connection(e.to_string()))?;

        let pg = Self { pool };
        pg.warm_up(config.pool.min_connections).await?;
        Ok(pg)
    }

    async fn warm_up(&self, min_connections: usize) -> LedgerResult<()> {
        let mut held = Vec::with_capacity(min_connections);
        for _ in 0..min_connections {
            held.push(self.get().await?);
        }
        debug!("Warmed {} PostgreSQL connections", held.len());
        Ok(())
    }

    /// Check out a connection; it returns to the pool when dropped.
    pub async fn get(&self) -> LedgerResult<PgConn> {
        self.pool
            .get()
            .await
            .map_err(|e| LedgerError::Connection(e.to_string()))
    }

    /// (size, available) snapshot of the pool.
    pub fn status(&self) -> (usize, usize) {
        let status = self.pool.status();
        (status.size, status.available)
    }
}

/// Unified database pool that supports both SQLite and PostgreSQL.
#[derive(Clone)]
pub enum DbPool {
    Sqlite(SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
}

impl DbPool {
    /// Build the pool for the configured backend.
    pub async fn connect(config: &LedgerConfig) -> LedgerResult<Self> {
        match config.backend {
            BackendKind::Embedded => Ok(DbPool::Sqlite(
                SqlitePool::open(&config.database_url, config.busy_timeout).await?,
            )),
            BackendKind::Networked => Self::connect_networked(config).await,
        }
    }

    #[cfg(feature = "postgres")]
    async fn connect_networked(config: &LedgerConfig) -> LedgerResult<Self> {
        Ok(DbPool::Postgres(PgPool::connect(config).await?))
    }

    #[cfg(not(feature = "postgres"))]
    async fn connect_networked(_config: &LedgerConfig) -> LedgerResult<Self> {
        Err(LedgerError::Permanent(
            "networked backend requires building with the `postgres` feature".to_string(),
        ))
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            DbPool::Sqlite(_) => BackendKind::Embedded,
            #[cfg(feature = "postgres")]
            DbPool::Postgres(_) => BackendKind::Networked,
        }
    }

    pub fn is_sqlite(&self) -> bool {
        matches!(self, DbPool::Sqlite(_))
    }
}

/// Macro for running database operations on either backend.
///
/// The connection is checked out for the duration of the body and returned
/// (or the mutex released) when the body finishes, on every exit path. An
/// embedded checkout only counts as finished once the body has run to
/// completion; a body dropped at an await point gets its connection replaced.
///
/// # Example
/// ```ignore
/// with_conn!(self.pool, conn => {
///     crawl_ledger::table.count().get_result::<i64>(conn).await
/// })
/// ```
#[macro_export]
macro_rules! with_conn {
    ($pool:expr, $conn:ident => $body:expr) => {{
        match &$pool {
            $crate::repository::pool::DbPool::Sqlite(pool) => {
                let mut checkout = pool.get().await?;
                let result = async {
                    let $conn = checkout.conn()?;
                    Ok::<_, $crate::repository::error::LedgerError>($body)
                }
                .await;
                checkout.finish();
                result?
            }
            #[cfg(feature = "postgres")]
            $crate::repository::pool::DbPool::Postgres(pool) => {
                let mut guard = pool.get().await?;
                let $conn = &mut *guard;
                $body
            }
        }
    }};
}

#[allow(unused_imports)]
pub use with_conn;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sqlite_path_strips_scheme() {
        assert_eq!(sqlite_path("sqlite:/data/ledger.db"), "/data/ledger.db");
        assert_eq!(sqlite_path("/data/ledger.db"), "/data/ledger.db");
    }

    #[tokio::test]
    async fn test_embedded_pool_is_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let url = path.display().to_string();

        let first = SqlitePool::open(&url, Duration::from_millis(50))
            .await
            .unwrap();
        first.get().await.unwrap().finish();

        // A second opener cannot take the file while the first is alive.
        let second = SqlitePool::open(&url, Duration::from_millis(50)).await;
        assert!(second.is_err());

        drop(first);
        assert!(SqlitePool::open(&url, Duration::from_millis(50))
            .await
            .is_ok());
    }

    #[cfg(not(feature = "postgres"))]
    #[tokio::test]
    async fn test_networked_requires_feature() {
        let config = LedgerConfig::networked("postgres://localhost/corpus");
        let result = DbPool::connect(&config).await;
        assert!(matches!(result, Err(LedgerError::Permanent(_))));
    }
}

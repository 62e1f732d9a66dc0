//! Async SQLite handle backed by a dedicated connection thread.
//!
//! Only SQL and lightweight row mapping belong inside [`Database::call`].
//! Network calls, notification delivery and other slow work must happen
//! after the closure returns, otherwise they stall every other query queued
//! on the same connection.

use std::path::Path;

use tokio_rusqlite::Connection;
use tracing::{debug, info};

use crate::{migrations, DatabaseError, DatabaseResult, Migration};

fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> DatabaseError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => DatabaseError::Sqlite(e),
        tokio_rusqlite::Error::Close(_) => {
            DatabaseError::Connection("Connection closed".to_string())
        }
        other => DatabaseError::Connection(other.to_string()),
    }
}

/// Cloneable handle to one SQLite connection.
///
/// Two handles opened on the same file behave like two service instances:
/// they share rows but not the connection, so their writes race through
/// SQLite's locking exactly as separate processes would.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
    path: String,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish()
    }
}

impl Database {
    /// Open (or create) the database file at `path`.
    pub async fn open(path: &Path, busy_timeout_ms: u64) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let path_str = path.to_string_lossy().to_string();
        info!(path = %path_str, "opening database");

        let conn = Connection::open(path)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        let db = Self {
            conn,
            path: path_str,
        };
        db.configure(true, busy_timeout_ms).await?;
        Ok(db)
    }

    /// Open a private in-memory database. Used by tests and `config` checks.
    pub async fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        let db = Self {
            conn,
            path: ":memory:".to_string(),
        };
        db.configure(false, 0).await?;
        Ok(db)
    }

    async fn configure(&self, file_backed: bool, busy_timeout_ms: u64) -> DatabaseResult<()> {
        self.call_sqlite(move |conn| {
            if file_backed {
                let _mode: String =
                    conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
                conn.pragma_update(None, "synchronous", "NORMAL")?;
            }
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms))?;
            Ok(())
        })
        .await
    }

    /// Run `f` on the connection thread and hand its result back.
    ///
    /// The error type is the caller's, so domain code can return its own
    /// errors from inside a transaction as long as they absorb
    /// [`DatabaseError`].
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<DatabaseError> + Send + 'static,
    {
        let outer = self.conn.call(move |conn| Ok(f(conn))).await;

        match outer {
            Ok(inner) => inner,
            Err(e) => Err(E::from(from_tokio_rusqlite(e))),
        }
    }

    /// Convenience wrapper for closures that only produce rusqlite errors.
    pub async fn call_sqlite<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)?))
            .await
            .map_err(from_tokio_rusqlite)
    }

    /// Apply every migration not yet recorded in `schema_migrations`.
    pub async fn run_migrations(&self, pending: Vec<(String, Migration)>) -> DatabaseResult<usize> {
        self.call(move |conn| migrations::run_migrations(conn, &pending))
            .await
    }

    /// Database file path (`:memory:` for in-memory handles).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Cheap liveness check.
    pub async fn health_check(&self) -> DatabaseResult<()> {
        let _: i64 = self
            .call_sqlite(|conn| conn.query_row("SELECT 1", [], |row| row.get(0)))
            .await?;
        debug!(path = %self.path, "database health check passed");
        Ok(())
    }
}

//! SQLite persistence layer for ShelfSwap.
//!
//! Every query runs on a dedicated connection thread owned by
//! [`Database`]. Callers hand closures to [`Database::call`]; the closure
//! receives `&mut rusqlite::Connection` so it can open transactions.
//!
//! ```ignore
//! let db = Database::open(Path::new("data/shelfswap.db"), 5000).await?;
//! db.run_migrations(registry.collect_migrations()).await?;
//! let count: i64 = db
//!     .call(|conn| Ok::<_, DatabaseError>(conn.query_row("SELECT 1", [], |r| r.get(0))?))
//!     .await?;
//! ```

mod error;
mod executor;
mod migrations;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::Database;
pub use migrations::{applied_migrations, run_migrations, Migration};

/// True when the error is a constraint violation or a lock timeout, i.e. the
/// write lost against a concurrent writer rather than failed outright.
pub fn is_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::ConstraintViolation)
            | Some(rusqlite::ErrorCode::DatabaseBusy)
            | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

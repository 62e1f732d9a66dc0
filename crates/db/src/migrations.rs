//! Module-contributed schema migrations.
//!
//! Each module hands over an ordered list of [`Migration`]s. Applied
//! migrations are tracked per `(module, id)` in `schema_migrations`, so a
//! module can add `002_...` later without touching anyone else.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use crate::{DatabaseError, DatabaseResult};

/// Migration definition contributed by a module
#[derive(Debug, Clone)]
pub struct Migration {
    pub id: &'static str,
    pub up: &'static str,
}

fn ensure_tracking_table(conn: &Connection) -> DatabaseResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            module TEXT NOT NULL,
            id TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (module, id)
        )",
        [],
    )?;
    Ok(())
}

/// Apply pending migrations in the order given. Returns how many ran.
pub fn run_migrations(
    conn: &mut Connection,
    migrations: &[(String, Migration)],
) -> DatabaseResult<usize> {
    ensure_tracking_table(conn)?;

    let mut applied = 0;
    for (module, migration) in migrations {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let already: Option<String> = tx
            .query_row(
                "SELECT id FROM schema_migrations WHERE module = ?1 AND id = ?2",
                params![module, migration.id],
                |row| row.get(0),
            )
            .optional()?;

        if already.is_some() {
            debug!(module = %module, id = migration.id, "migration already applied");
            continue;
        }

        info!(module = %module, id = migration.id, "applying migration");
        tx.execute_batch(migration.up).map_err(|e| {
            DatabaseError::Migration(format!("{module}/{}: {e}", migration.id))
        })?;
        tx.execute(
            "INSERT INTO schema_migrations (module, id) VALUES (?1, ?2)",
            params![module, migration.id],
        )?;
        tx.commit()?;
        applied += 1;
    }

    info!(applied, total = migrations.len(), "migrations complete");
    Ok(applied)
}

/// List applied migrations as `(module, id)` pairs.
pub fn applied_migrations(conn: &Connection) -> DatabaseResult<Vec<(String, String)>> {
    ensure_tracking_table(conn)?;
    let mut stmt =
        conn.prepare_cached("SELECT module, id FROM schema_migrations ORDER BY module, id")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

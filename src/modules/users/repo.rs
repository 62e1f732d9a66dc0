use rusqlite::{params, Connection, OptionalExtension, Row};
use time::OffsetDateTime;

use super::models::{Profile, ProfileSummary, ProfileUpdate};

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

pub fn get_profile(conn: &Connection, id: &str) -> rusqlite::Result<Option<Profile>> {
    conn.prepare_cached(
        "SELECT id, username, display_name, created_at, updated_at FROM profiles WHERE id = ?1",
    )?
    .query_row(params![id], profile_from_row)
    .optional()
}

/// Insert or replace the editable fields, keeping `created_at`.
pub fn upsert_profile(
    conn: &Connection,
    id: &str,
    update: &ProfileUpdate,
    now: OffsetDateTime,
) -> rusqlite::Result<Profile> {
    conn.prepare_cached(
        "INSERT INTO profiles (id, username, display_name, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT (id) DO UPDATE SET
             username = excluded.username,
             display_name = excluded.display_name,
             updated_at = excluded.updated_at
         RETURNING id, username, display_name, created_at, updated_at",
    )?
    .query_row(
        params![id, update.username, update.display_name, now],
        profile_from_row,
    )
}

/// Summary for `id`, synthesized when no profile exists.
pub fn summary(conn: &Connection, id: &str) -> rusqlite::Result<ProfileSummary> {
    Ok(get_profile(conn, id)?
        .map(|p| ProfileSummary::from(&p))
        .unwrap_or_else(|| ProfileSummary::anonymous(id)))
}

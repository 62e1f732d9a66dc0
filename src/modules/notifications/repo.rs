use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::{Notification, NotificationDraft, NotificationPayload};

const NOTIFICATION_COLUMNS: &str =
    "id, recipient_id, kind, request_id, payload, is_read, created_at";

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    let payload: String = row.get(4)?;
    let payload: NotificationPayload = serde_json::from_str(&payload).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Notification {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        kind: row.get(2)?,
        request_id: row.get(3)?,
        payload,
        is_read: row.get(5)?,
        created_at: row.get(6)?,
    })
}

pub fn insert(
    conn: &Connection,
    id: &str,
    draft: &NotificationDraft,
    created_at: time::OffsetDateTime,
) -> rusqlite::Result<()> {
    let payload = serde_json::to_string(&draft.payload)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "INSERT INTO notifications (id, recipient_id, kind, request_id, payload, is_read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        params![id, draft.recipient_id, draft.kind, draft.request_id, payload, created_at],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<Notification>> {
    let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1");
    conn.prepare_cached(&sql)?
        .query_row(params![id], notification_from_row)
        .optional()
}

pub fn list(
    conn: &Connection,
    recipient_id: &str,
    unread_only: bool,
) -> rusqlite::Result<Vec<Notification>> {
    let sql = format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications
         WHERE recipient_id = ?1 AND (?2 = 0 OR is_read = 0)
         ORDER BY created_at DESC, id DESC"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let notifications = stmt
        .query_map(params![recipient_id, unread_only], notification_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(notifications)
}

pub fn mark_read(conn: &Connection, id: &str, recipient_id: &str) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND recipient_id = ?2",
        params![id, recipient_id],
    )?;
    Ok(count == 1)
}

pub fn mark_all_read(conn: &Connection, recipient_id: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE recipient_id = ?1 AND is_read = 0",
        params![recipient_id],
    )
}

pub fn delete(conn: &Connection, id: &str, recipient_id: &str) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "DELETE FROM notifications WHERE id = ?1 AND recipient_id = ?2",
        params![id, recipient_id],
    )?;
    Ok(count == 1)
}

pub fn unread_count(conn: &Connection, recipient_id: &str) -> rusqlite::Result<u64> {
    let count: i64 = conn
        .prepare_cached("SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND is_read = 0")?
        .query_row(params![recipient_id], |row| row.get(0))?;
    Ok(u64::try_from(count).unwrap_or_default())
}

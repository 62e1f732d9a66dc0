//! SQL for the `books` table. Every function takes a `&Connection` so it
//! works equally on a plain connection and inside a transaction.

use rusqlite::{params, Connection, OptionalExtension, Row};
use time::OffsetDateTime;

use super::models::Book;
use crate::modules::swaps::repo::ACTIVE_STATUSES_SQL;

const BOOK_COLUMNS: &str =
    "b.id, b.owner_id, b.title, b.authors, b.condition, b.description, b.is_available, b.created_at, b.updated_at";

fn book_from_row(row: &Row<'_>) -> rusqlite::Result<Book> {
    let authors: String = row.get(3)?;
    let authors: Vec<String> = serde_json::from_str(&authors).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Book {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        authors,
        condition: row.get(4)?,
        description: row.get(5)?,
        is_available: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn authors_json(book: &Book) -> rusqlite::Result<String> {
    serde_json::to_string(&book.authors).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

pub fn insert_book(conn: &Connection, book: &Book) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO books (id, owner_id, title, authors, condition, description, is_available, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            book.id,
            book.owner_id,
            book.title,
            authors_json(book)?,
            book.condition,
            book.description,
            book.is_available,
            book.created_at,
            book.updated_at,
        ],
    )?;
    Ok(())
}

pub fn get_book(conn: &Connection, id: &str) -> rusqlite::Result<Option<Book>> {
    let sql = format!("SELECT {BOOK_COLUMNS} FROM books b WHERE b.id = ?1");
    conn.prepare_cached(&sql)?
        .query_row(params![id], book_from_row)
        .optional()
}

pub fn list_owned(conn: &Connection, owner_id: &str) -> rusqlite::Result<Vec<Book>> {
    let sql = format!(
        "SELECT {BOOK_COLUMNS} FROM books b WHERE b.owner_id = ?1 ORDER BY b.created_at DESC, b.id DESC"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let books = stmt
        .query_map(params![owner_id], book_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(books)
}

/// Persist descriptive fields (not availability, not ownership).
pub fn update_details(conn: &Connection, book: &Book) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE books SET title = ?2, authors = ?3, condition = ?4, description = ?5, updated_at = ?6
         WHERE id = ?1",
        params![
            book.id,
            book.title,
            authors_json(book)?,
            book.condition,
            book.description,
            book.updated_at,
        ],
    )
}

pub fn delete_book(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let count = conn.execute("DELETE FROM books WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

/// Unconditional flag write, used for the owner's manual toggle.
pub fn set_available(
    conn: &Connection,
    id: &str,
    is_available: bool,
    now: OffsetDateTime,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE books SET is_available = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, is_available, now],
    )
}

/// Compare-and-set `available -> unavailable` for a book still owned by
/// `owner_id`. False when someone else got there first.
pub fn reserve(
    conn: &Connection,
    id: &str,
    owner_id: &str,
    now: OffsetDateTime,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE books SET is_available = 0, updated_at = ?3
         WHERE id = ?1 AND owner_id = ?2 AND is_available = 1",
        params![id, owner_id, now],
    )?;
    Ok(count == 1)
}

/// Put a book that is no longer held back on offer.
pub fn release(conn: &Connection, id: &str, now: OffsetDateTime) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE books SET is_available = 1, updated_at = ?2 WHERE id = ?1",
        params![id, now],
    )
}

/// Hand a book to its new owner; it stays unlisted until they list it.
pub fn transfer(
    conn: &Connection,
    id: &str,
    new_owner_id: &str,
    now: OffsetDateTime,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE books SET owner_id = ?2, is_available = 0, updated_at = ?3 WHERE id = ?1",
        params![id, new_owner_id, now],
    )
}

/// Whether a non-terminal swap request currently holds this book.
pub fn is_held(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    conn.prepare_cached("SELECT EXISTS (SELECT 1 FROM swap_requests WHERE held_book_id = ?1)")?
        .query_row(params![id], |row| row.get(0))
}

/// Whether any non-terminal request references the book in any role.
pub fn is_referenced(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let sql = format!(
        "SELECT EXISTS (
            SELECT 1 FROM swap_requests
            WHERE status IN {ACTIVE_STATUSES_SQL}
              AND (book_id = ?1 OR offered_book_id = ?1 OR counter_offered_book_id = ?1)
        )"
    );
    conn.prepare_cached(&sql)?
        .query_row(params![id], |row| row.get(0))
}

/// Whether the book is the target of an ACCEPTED request other than
/// `excluding_request`, i.e. already promised to someone.
pub fn is_committed_target(
    conn: &Connection,
    id: &str,
    excluding_request: Option<&str>,
) -> rusqlite::Result<bool> {
    conn.prepare_cached(
        "SELECT EXISTS (
            SELECT 1 FROM swap_requests
            WHERE book_id = ?1 AND status = 'ACCEPTED' AND id IS NOT ?2
        )",
    )?
    .query_row(params![id, excluding_request], |row| row.get(0))
}

pub fn list_available_for_offering(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<Book>> {
    let sql = format!(
        "SELECT {BOOK_COLUMNS} FROM books b
         WHERE b.owner_id = ?1
           AND b.is_available = 1
           AND NOT EXISTS (SELECT 1 FROM swap_requests s WHERE s.held_book_id = b.id)
           AND NOT EXISTS (SELECT 1 FROM swap_requests s WHERE s.book_id = b.id AND s.status = 'ACCEPTED')
         ORDER BY b.title COLLATE NOCASE, b.id"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let books = stmt
        .query_map(params![user_id], book_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(books)
}

pub fn list_discoverable(conn: &Connection, excluding_user_id: &str) -> rusqlite::Result<Vec<Book>> {
    let sql = format!(
        "SELECT {BOOK_COLUMNS} FROM books b
         WHERE b.owner_id != ?1
           AND b.is_available = 1
           AND NOT EXISTS (
               SELECT 1 FROM swap_requests s
               WHERE s.status IN {ACTIVE_STATUSES_SQL}
                 AND (s.book_id = b.id OR s.offered_book_id = b.id OR s.counter_offered_book_id = b.id)
           )
         ORDER BY b.created_at DESC, b.id DESC"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let books = stmt
        .query_map(params![excluding_user_id], book_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(books)
}

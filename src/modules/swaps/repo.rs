//! SQL for `swap_requests` and the transaction that applies a [`Plan`].

use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use time::OffsetDateTime;

use super::models::{SwapRequest, SwapRequestView, SwapStatistics, SwapStatus, UserSwapRequests};
use super::state::{Guard, Plan};
use crate::error::{ServiceError, ServiceResult};
use crate::modules::books::models::BookSummary;
use crate::modules::books::repo as books;
use crate::modules::users::{models::ProfileSummary, repo as users};

/// SQL literal list of the non-terminal statuses.
pub const ACTIVE_STATUSES_SQL: &str = "('PENDING', 'COUNTER_OFFER', 'ACCEPTED')";

pub const SCHEMA: &str = r#"
    CREATE TABLE swap_requests (
        id                      TEXT PRIMARY KEY,
        requester_id            TEXT NOT NULL,
        owner_id                TEXT NOT NULL,
        book_id                 TEXT NOT NULL,
        offered_book_id         TEXT,
        counter_offered_book_id TEXT,
        held_book_id            TEXT,
        status                  TEXT NOT NULL
            CHECK (status IN ('PENDING', 'COUNTER_OFFER', 'ACCEPTED', 'COMPLETED', 'CANCELLED')),
        message                 TEXT,
        counter_offer_message   TEXT,
        requester_completed_at  TEXT,
        owner_completed_at      TEXT,
        requester_rating        INTEGER CHECK (requester_rating BETWEEN 1 AND 5),
        requester_feedback      TEXT,
        owner_rating            INTEGER CHECK (owner_rating BETWEEN 1 AND 5),
        owner_feedback          TEXT,
        version                 INTEGER NOT NULL DEFAULT 1,
        created_at              TEXT NOT NULL,
        updated_at              TEXT NOT NULL,
        CHECK (requester_id <> owner_id),
        CHECK (counter_offered_book_id IS NULL OR counter_offered_book_id IS NOT offered_book_id),
        CHECK (status <> 'COMPLETED'
               OR (requester_completed_at IS NOT NULL AND owner_completed_at IS NOT NULL)),
        CHECK (held_book_id IS NULL OR status IN ('PENDING', 'COUNTER_OFFER', 'ACCEPTED'))
    );

    -- a book is held by at most one live request
    CREATE UNIQUE INDEX swap_requests_held_book_unique
        ON swap_requests (held_book_id) WHERE held_book_id IS NOT NULL;

    -- one live request per requester and target book
    CREATE UNIQUE INDEX swap_requests_live_pair_unique
        ON swap_requests (requester_id, book_id)
        WHERE status IN ('PENDING', 'COUNTER_OFFER', 'ACCEPTED');

    CREATE INDEX swap_requests_requester ON swap_requests (requester_id, created_at);
    CREATE INDEX swap_requests_owner ON swap_requests (owner_id, created_at);
    CREATE INDEX swap_requests_book ON swap_requests (book_id, status);
"#;

const SWAP_COLUMNS: &str = "id, requester_id, owner_id, book_id, offered_book_id, counter_offered_book_id, \
     status, message, counter_offer_message, requester_completed_at, owner_completed_at, \
     requester_rating, requester_feedback, owner_rating, owner_feedback, version, created_at, updated_at";

fn swap_from_row(row: &Row<'_>) -> rusqlite::Result<SwapRequest> {
    Ok(SwapRequest {
        id: row.get(0)?,
        requester_id: row.get(1)?,
        owner_id: row.get(2)?,
        book_id: row.get(3)?,
        offered_book_id: row.get(4)?,
        counter_offered_book_id: row.get(5)?,
        status: row.get(6)?,
        message: row.get(7)?,
        counter_offer_message: row.get(8)?,
        requester_completed_at: row.get(9)?,
        owner_completed_at: row.get(10)?,
        requester_rating: row.get(11)?,
        requester_feedback: row.get(12)?,
        owner_rating: row.get(13)?,
        owner_feedback: row.get(14)?,
        version: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

pub fn get_swap(conn: &Connection, id: &str) -> rusqlite::Result<Option<SwapRequest>> {
    let sql = format!("SELECT {SWAP_COLUMNS} FROM swap_requests WHERE id = ?1");
    conn.prepare_cached(&sql)?
        .query_row(params![id], swap_from_row)
        .optional()
}

fn insert_swap(conn: &Connection, request: &SwapRequest) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO swap_requests (
             id, requester_id, owner_id, book_id, offered_book_id, counter_offered_book_id,
             held_book_id, status, message, counter_offer_message, version, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            request.id,
            request.requester_id,
            request.owner_id,
            request.book_id,
            request.offered_book_id,
            request.counter_offered_book_id,
            request.held_book(),
            request.status,
            request.message,
            request.counter_offer_message,
            request.version,
            request.created_at,
            request.updated_at,
        ],
    )?;
    Ok(())
}

/// Write the mutable columns if the row is still at `expected_version`.
/// Returns false when another writer got there first.
fn update_swap_cas(
    conn: &Connection,
    request: &SwapRequest,
    expected_version: i64,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE swap_requests SET
             counter_offered_book_id = ?3,
             held_book_id = ?4,
             status = ?5,
             counter_offer_message = ?6,
             requester_completed_at = ?7,
             owner_completed_at = ?8,
             requester_rating = ?9,
             requester_feedback = ?10,
             owner_rating = ?11,
             owner_feedback = ?12,
             version = ?13,
             updated_at = ?14
         WHERE id = ?1 AND version = ?2",
        params![
            request.id,
            expected_version,
            request.counter_offered_book_id,
            request.held_book(),
            request.status,
            request.counter_offer_message,
            request.requester_completed_at,
            request.owner_completed_at,
            request.requester_rating,
            request.requester_feedback,
            request.owner_rating,
            request.owner_feedback,
            request.version,
            request.updated_at,
        ],
    )?;
    Ok(count == 1)
}

/// Live requests, other than `exclude_id`, whose target is one of `book_ids`.
fn live_requests_targeting(
    conn: &Connection,
    book_ids: &[&str],
    exclude_id: &str,
) -> rusqlite::Result<Vec<SwapRequest>> {
    let sql = format!(
        "SELECT {SWAP_COLUMNS} FROM swap_requests
         WHERE book_id = ?1 AND id <> ?2 AND status IN {ACTIVE_STATUSES_SQL}
         ORDER BY created_at"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let mut found = Vec::new();
    for book_id in book_ids {
        let rows = stmt.query_map(params![book_id, exclude_id], swap_from_row)?;
        for row in rows {
            found.push(row?);
        }
    }
    Ok(found)
}

pub fn list_for_user(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<SwapRequest>> {
    let sql = format!(
        "SELECT {SWAP_COLUMNS} FROM swap_requests
         WHERE requester_id = ?1 OR owner_id = ?1
         ORDER BY created_at DESC, id DESC"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let requests = stmt
        .query_map(params![user_id], swap_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(requests)
}

/// Requests that left the live set as a side effect of a completion.
#[derive(Debug, Clone, Default)]
pub struct Applied {
    pub superseded: Vec<SwapRequest>,
}

/// Execute `plan` as one `BEGIN IMMEDIATE` transaction.
///
/// The request row is written with a compare-and-set on `version`, newly
/// held books are reserved with a compare-and-set on `is_available`, and
/// any zero-row match rolls the whole thing back as `Conflict`.
pub fn apply_plan(
    conn: &mut Connection,
    plan: &Plan,
    now: OffsetDateTime,
) -> ServiceResult<Applied> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| ServiceError::from_write(e, "the request is busy, try again"))?;

    if let Some(guard) = &plan.guard {
        check_guard(&tx, guard, &plan.request.id)?;
    }

    let request = &plan.request;
    match plan.expected_version {
        None => insert_swap(&tx, request).map_err(|e| {
            ServiceError::from_write(e, "this request overlaps another open request")
        })?,
        Some(expected) => {
            let written = update_swap_cas(&tx, request, expected).map_err(|e| {
                ServiceError::from_write(e, "a book in this request is held by another request")
            })?;
            if !written {
                return Err(ServiceError::conflict(
                    "the request was changed by someone else, refresh and try again",
                ));
            }
        }
    }

    if let Some(reservation) = &plan.reserve {
        if books::is_committed_target(&tx, &reservation.book_id, None)? {
            return Err(ServiceError::conflict(
                "that book is already promised in an accepted swap",
            ));
        }
        if !books::reserve(&tx, &reservation.book_id, &reservation.owner_id, now)? {
            return Err(ServiceError::conflict("that book is no longer available"));
        }
    }

    if let Some(book_id) = &plan.release {
        books::release(&tx, book_id, now)?;
    }

    let mut applied = Applied::default();
    if let Some(transfer) = &plan.transfer {
        books::transfer(&tx, &transfer.target_book_id, &transfer.requester_id, now)?;
        let mut exchanged = vec![transfer.target_book_id.as_str()];
        if let Some(book_id) = &transfer.exchanged_book_id {
            books::transfer(&tx, book_id, &transfer.owner_id, now)?;
            exchanged.push(book_id.as_str());
        }
        applied.superseded = cancel_superseded(&tx, &exchanged, &request.id, now)?;
    }

    tx.commit()
        .map_err(|e| ServiceError::from_write(e, "the request is busy, try again"))?;
    Ok(applied)
}

fn check_guard(conn: &Connection, guard: &Guard, request_id: &str) -> ServiceResult<()> {
    match guard {
        Guard::TargetListed { book_id, owner_id } => {
            let book = books::get_book(conn, book_id)?;
            let listed = book.is_some_and(|b| &b.owner_id == owner_id && b.is_available);
            if !listed {
                return Err(ServiceError::conflict("the requested book is not available"));
            }
        }
        Guard::TargetUncommitted { book_id, owner_id } => {
            let book = books::get_book(conn, book_id)?;
            if !book.is_some_and(|b| &b.owner_id == owner_id) {
                return Err(ServiceError::conflict("the requested book changed hands"));
            }
            if books::is_held(conn, book_id)?
                || books::is_committed_target(conn, book_id, Some(request_id))?
            {
                return Err(ServiceError::conflict(
                    "the requested book is already tied up in another swap",
                ));
            }
        }
    }
    Ok(())
}

/// Cancel live requests for books that just changed hands, releasing
/// whatever they held.
fn cancel_superseded(
    conn: &Connection,
    book_ids: &[&str],
    completed_id: &str,
    now: OffsetDateTime,
) -> ServiceResult<Vec<SwapRequest>> {
    let mut cancelled = Vec::new();
    for before in live_requests_targeting(conn, book_ids, completed_id)? {
        let mut after = before.clone();
        after.status = SwapStatus::Cancelled;
        after.version = before.version + 1;
        after.updated_at = now;

        if !update_swap_cas(conn, &after, before.version)? {
            return Err(ServiceError::conflict("a related request changed concurrently"));
        }
        if let Some(held) = before.held_book() {
            books::release(conn, held, now)?;
        }
        tracing::debug!(request_id = %after.id, "superseded by a completed swap");
        cancelled.push(after);
    }
    Ok(cancelled)
}

/// Join requests with book and profile summaries, caching lookups.
fn views(conn: &Connection, requests: Vec<SwapRequest>) -> rusqlite::Result<Vec<SwapRequestView>> {
    let mut book_cache: HashMap<String, Option<BookSummary>> = HashMap::new();
    let mut profile_cache: HashMap<String, ProfileSummary> = HashMap::new();

    let mut book = |id: Option<&String>| -> rusqlite::Result<Option<BookSummary>> {
        let Some(id) = id else { return Ok(None) };
        if let Some(cached) = book_cache.get(id) {
            return Ok(cached.clone());
        }
        let summary = books::get_book(conn, id)?.map(|b| BookSummary::from(&b));
        book_cache.insert(id.clone(), summary.clone());
        Ok(summary)
    };

    let mut out = Vec::with_capacity(requests.len());
    for request in requests {
        let target = book(Some(&request.book_id))?;
        let offered = book(request.offered_book_id.as_ref())?;
        let counter = book(request.counter_offered_book_id.as_ref())?;

        let mut profile = |id: &str| -> rusqlite::Result<ProfileSummary> {
            if let Some(cached) = profile_cache.get(id) {
                return Ok(cached.clone());
            }
            let summary = users::summary(conn, id)?;
            profile_cache.insert(id.to_string(), summary.clone());
            Ok(summary)
        };
        let requester = profile(&request.requester_id)?;
        let owner = profile(&request.owner_id)?;

        out.push(SwapRequestView {
            request,
            book: target,
            offered_book: offered,
            counter_offered_book: counter,
            requester,
            owner,
        });
    }
    Ok(out)
}

pub fn view(conn: &Connection, request: SwapRequest) -> rusqlite::Result<SwapRequestView> {
    let mut joined = views(conn, vec![request])?;
    joined
        .pop()
        .ok_or(rusqlite::Error::QueryReturnedNoRows)
}

pub fn requests_for_user(conn: &Connection, user_id: &str) -> rusqlite::Result<UserSwapRequests> {
    let (incoming, outgoing): (Vec<_>, Vec<_>) = list_for_user(conn, user_id)?
        .into_iter()
        .partition(|r| r.owner_id == user_id);
    Ok(UserSwapRequests {
        incoming: views(conn, incoming)?,
        outgoing: views(conn, outgoing)?,
    })
}

/// Counts across every request the user is party to. "Pending" covers
/// requests still awaiting a response, counter-offers included.
pub fn statistics(conn: &Connection, user_id: &str) -> rusqlite::Result<SwapStatistics> {
    conn.prepare_cached(
        "SELECT
             COALESCE(SUM(CASE WHEN status = 'COMPLETED' THEN 1 ELSE 0 END), 0),
             COALESCE(SUM(CASE WHEN status IN ('PENDING', 'COUNTER_OFFER') THEN 1 ELSE 0 END), 0),
             COALESCE(SUM(CASE WHEN status = 'ACCEPTED' THEN 1 ELSE 0 END), 0),
             COALESCE(SUM(CASE WHEN status = 'CANCELLED' THEN 1 ELSE 0 END), 0),
             COALESCE(SUM(CASE WHEN owner_id = ?1 THEN 1 ELSE 0 END), 0),
             COALESCE(SUM(CASE WHEN requester_id = ?1 THEN 1 ELSE 0 END), 0),
             AVG(CASE WHEN owner_id = ?1 THEN requester_rating ELSE owner_rating END),
             COUNT(CASE WHEN owner_id = ?1 THEN requester_rating ELSE owner_rating END)
         FROM swap_requests
         WHERE requester_id = ?1 OR owner_id = ?1",
    )?
    .query_row(params![user_id], |row| {
        let count = |idx: usize| -> rusqlite::Result<u64> {
            let n: i64 = row.get(idx)?;
            Ok(u64::try_from(n).unwrap_or_default())
        };
        Ok(SwapStatistics {
            total_completed: count(0)?,
            total_pending: count(1)?,
            total_accepted: count(2)?,
            total_cancelled: count(3)?,
            total_incoming: count(4)?,
            total_outgoing: count(5)?,
            average_rating_received: row.get(6)?,
            ratings_received: count(7)?,
        })
    })
}

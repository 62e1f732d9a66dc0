use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::state::Transition;
use crate::modules::books::models::{Book, BookSummary};
use crate::modules::users::models::ProfileSummary;

/// Lifecycle of a swap request. `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapStatus {
    Pending,
    CounterOffer,
    Accepted,
    Completed,
    Cancelled,
}

impl SwapStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::CounterOffer => "COUNTER_OFFER",
            Self::Accepted => "ACCEPTED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "COUNTER_OFFER" => Some(Self::CounterOffer),
            "ACCEPTED" => Some(Self::Accepted),
            "COMPLETED" => Some(Self::Completed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for SwapStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SwapStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Self::parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown swap status {s}").into()))
    }
}

/// A proposal to exchange books between a requester and a book's owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub id: String,
    pub requester_id: String,
    /// Owner of the target book when the request was made
    pub owner_id: String,
    /// The requested book
    pub book_id: String,
    pub offered_book_id: Option<String>,
    pub counter_offered_book_id: Option<String>,
    pub status: SwapStatus,
    pub message: Option<String>,
    pub counter_offer_message: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub requester_completed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub owner_completed_at: Option<OffsetDateTime>,
    /// Rating the requester gave the owner
    pub requester_rating: Option<u8>,
    pub requester_feedback: Option<String>,
    /// Rating the owner gave the requester
    pub owner_rating: Option<u8>,
    pub owner_feedback: Option<String>,
    /// Bumped on every write; the compare-and-set key
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl SwapRequest {
    /// The book this request currently keeps off the market.
    pub fn held_book(&self) -> Option<&str> {
        super::state::held_book(
            self.status,
            self.offered_book_id.as_deref(),
            self.counter_offered_book_id.as_deref(),
        )
    }

    /// The book that goes to the owner when the swap completes.
    pub fn exchanged_book(&self) -> Option<&str> {
        self.counter_offered_book_id
            .as_deref()
            .or(self.offered_book_id.as_deref())
    }

    pub fn is_party(&self, user_id: &str) -> bool {
        self.requester_id == user_id || self.owner_id == user_id
    }
}

/// Body of `POST /api/swaps`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSwapRequest {
    pub book_id: String,
    #[serde(default)]
    pub offered_book_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of `POST /api/swaps/{id}/counter-offer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterOfferBody {
    pub counter_offered_book_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of `POST /api/swaps/{id}/complete`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteBody {
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub feedback: Option<String>,
}

/// A request joined with the books and people it refers to.
#[derive(Debug, Clone, Serialize)]
pub struct SwapRequestView {
    #[serde(flatten)]
    pub request: SwapRequest,
    pub book: Option<BookSummary>,
    pub offered_book: Option<BookSummary>,
    pub counter_offered_book: Option<BookSummary>,
    pub requester: ProfileSummary,
    pub owner: ProfileSummary,
}

/// Requests split by the user's role in them, newest first.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserSwapRequests {
    /// Requests for books the user owns
    pub incoming: Vec<SwapRequestView>,
    /// Requests the user made
    pub outgoing: Vec<SwapRequestView>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwapStatistics {
    pub total_completed: u64,
    pub total_pending: u64,
    pub total_accepted: u64,
    pub total_cancelled: u64,
    pub total_incoming: u64,
    pub total_outgoing: u64,
    /// Mean of ratings the counterpart gave this user, if any
    pub average_rating_received: Option<f64>,
    pub ratings_received: u64,
}

/// Broadcast after every committed transition.
#[derive(Debug, Clone, Serialize)]
pub struct SwapEvent {
    pub kind: Transition,
    pub request: SwapRequest,
    /// Committed state of the books the request refers to
    pub books: Vec<Book>,
}

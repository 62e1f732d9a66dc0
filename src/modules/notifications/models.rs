use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::modules::swaps::state::Transition;

/// Denormalized display data, so a notification renders without joins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub requested_book_title: Option<String>,
    /// Counter-offered book if there is one, else the offered book
    pub offered_book_title: Option<String>,
    pub actor_display_name: String,
}

/// What the engine hands the dispatcher for one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationDraft {
    pub recipient_id: String,
    pub kind: Transition,
    pub request_id: String,
    pub payload: NotificationPayload,
}

/// A persisted notification as its recipient sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub kind: Transition,
    pub request_id: String,
    pub payload: NotificationPayload,
    pub is_read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Query string of `GET /api/notifications`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCount {
    pub unread: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkedRead {
    pub updated: u64,
}

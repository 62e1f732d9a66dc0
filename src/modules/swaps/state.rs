//! The swap request state table.
//!
//! Everything here is pure: given a snapshot of a request (and, for
//! creation and counter-offers, of the books involved) it either rejects
//! the command or produces a [`Plan`] describing the new row and the book
//! side effects. [`super::repo::apply_plan`] turns a plan into one
//! transaction.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use shelfswap_authz::{require, Capability, CapabilitySet, Denied, Party};
use time::OffsetDateTime;

use super::models::{SwapRequest, SwapStatus};
use crate::error::{ServiceError, ServiceResult};
use crate::modules::books::models::Book;

pub const MAX_MESSAGE_LEN: usize = 1000;
pub const MAX_FEEDBACK_LEN: usize = 2000;
pub const RATING_RANGE: std::ops::RangeInclusive<u8> = 1..=5;

/// The single book a request keeps unavailable in a given status.
pub fn held_book<'a>(
    status: SwapStatus,
    offered_book_id: Option<&'a str>,
    counter_offered_book_id: Option<&'a str>,
) -> Option<&'a str> {
    match status {
        SwapStatus::Pending => offered_book_id,
        SwapStatus::CounterOffer => counter_offered_book_id,
        SwapStatus::Accepted => counter_offered_book_id.or(offered_book_id),
        SwapStatus::Completed | SwapStatus::Cancelled => None,
    }
}

/// What the actor may do on this request, before looking at its status.
pub fn capabilities(actor: &str, request: &SwapRequest) -> CapabilitySet {
    CapabilitySet::for_party(party_of(actor, request))
}

pub fn party_of(actor: &str, request: &SwapRequest) -> Option<Party> {
    Party::resolve(actor, &request.requester_id, &request.owner_id)
}

/// Every engine operation as one closed set of commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwapCommand {
    Create {
        book_id: String,
        #[serde(default)]
        offered_book_id: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    CounterOffer {
        request_id: String,
        counter_offered_book_id: String,
        #[serde(default)]
        message: Option<String>,
    },
    Accept {
        request_id: String,
    },
    Cancel {
        request_id: String,
    },
    Complete {
        request_id: String,
        #[serde(default)]
        rating: Option<u8>,
        #[serde(default)]
        feedback: Option<String>,
    },
}

/// Tag of a committed transition. Doubles as the notification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Created,
    Accepted,
    Countered,
    Cancelled,
    PartiallyCompleted,
    Completed,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Accepted => "accepted",
            Self::Countered => "countered",
            Self::Cancelled => "cancelled",
            Self::PartiallyCompleted => "partially_completed",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "accepted" => Some(Self::Accepted),
            "countered" => Some(Self::Countered),
            "cancelled" => Some(Self::Cancelled),
            "partially_completed" => Some(Self::PartiallyCompleted),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for Transition {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Transition {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Self::parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown transition {s}").into()))
    }
}

/// Precondition re-checked inside the write transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// The target still belongs to `owner_id` and is available.
    TargetListed { book_id: String, owner_id: String },
    /// The target still belongs to `owner_id`, is not held by any request
    /// and is not promised to another accepted request.
    TargetUncommitted { book_id: String, owner_id: String },
}

/// Ownership changes made by the second completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipTransfer {
    pub target_book_id: String,
    pub requester_id: String,
    pub exchanged_book_id: Option<String>,
    pub owner_id: String,
}

/// A book to take off the market, owned by `owner_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub book_id: String,
    pub owner_id: String,
}

/// Outcome of a legal command: the new row plus its side effects.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub transition: Transition,
    pub actor: Party,
    /// `None` for creation, otherwise the version the snapshot saw
    pub expected_version: Option<i64>,
    pub request: SwapRequest,
    pub guard: Option<Guard>,
    pub reserve: Option<Reservation>,
    pub release: Option<String>,
    pub transfer: Option<OwnershipTransfer>,
}

impl Plan {
    fn between(
        transition: Transition,
        actor: Party,
        before: &SwapRequest,
        mut after: SwapRequest,
        now: OffsetDateTime,
    ) -> Self {
        after.version = before.version + 1;
        after.updated_at = now;

        let held_before = before.held_book();
        let held_after = after.held_book();
        let (reserve, release) = if held_before == held_after {
            (None, None)
        } else {
            let owner_of = |book: &str| {
                if before.offered_book_id.as_deref() == Some(book) {
                    before.requester_id.clone()
                } else {
                    before.owner_id.clone()
                }
            };
            (
                held_after.map(|book| Reservation {
                    book_id: book.to_string(),
                    owner_id: owner_of(book),
                }),
                held_before.map(str::to_string),
            )
        };

        Self {
            transition,
            actor,
            expected_version: Some(before.version),
            request: after,
            guard: None,
            reserve,
            release,
            transfer: None,
        }
    }

    /// Users to notify about this transition.
    pub fn recipients(&self) -> Vec<&str> {
        let request = &self.request;
        match self.transition {
            Transition::Completed => vec![request.requester_id.as_str(), request.owner_id.as_str()],
            _ => match self.actor.counterpart() {
                Party::Requester => vec![request.requester_id.as_str()],
                Party::Owner => vec![request.owner_id.as_str()],
            },
        }
    }
}

/// A new request for `target`, optionally offering `offered`.
pub fn plan_create(
    id: String,
    requester_id: &str,
    target: &Book,
    offered: Option<&Book>,
    message: Option<String>,
    now: OffsetDateTime,
) -> ServiceResult<Plan> {
    if target.owner_id == requester_id {
        return Err(ServiceError::validation(
            "book_id",
            "you cannot request your own book",
        ));
    }
    if !target.is_available {
        return Err(ServiceError::conflict("the requested book is not available"));
    }
    if let Some(book) = offered {
        if book.owner_id != requester_id {
            return Err(ServiceError::validation(
                "offered_book_id",
                "you can only offer books you own",
            ));
        }
        if book.id == target.id {
            return Err(ServiceError::validation(
                "offered_book_id",
                "the offered book must differ from the requested one",
            ));
        }
        if !book.is_available {
            return Err(ServiceError::conflict("the offered book is not available"));
        }
    }
    let message = clean_text("message", message, MAX_MESSAGE_LEN)?;

    let request = SwapRequest {
        id,
        requester_id: requester_id.to_string(),
        owner_id: target.owner_id.clone(),
        book_id: target.id.clone(),
        offered_book_id: offered.map(|b| b.id.clone()),
        counter_offered_book_id: None,
        status: SwapStatus::Pending,
        message,
        counter_offer_message: None,
        requester_completed_at: None,
        owner_completed_at: None,
        requester_rating: None,
        requester_feedback: None,
        owner_rating: None,
        owner_feedback: None,
        version: 1,
        created_at: now,
        updated_at: now,
    };

    Ok(Plan {
        transition: Transition::Created,
        actor: Party::Requester,
        expected_version: None,
        guard: Some(Guard::TargetListed {
            book_id: target.id.clone(),
            owner_id: target.owner_id.clone(),
        }),
        reserve: offered.map(|b| Reservation {
            book_id: b.id.clone(),
            owner_id: requester_id.to_string(),
        }),
        release: None,
        transfer: None,
        request,
    })
}

/// The owner substitutes `counter` for whatever the requester offered.
pub fn plan_counter_offer(
    request: &SwapRequest,
    actor: &str,
    counter: &Book,
    message: Option<String>,
    now: OffsetDateTime,
) -> ServiceResult<Plan> {
    let party = acting_party(actor, request)?;
    ensure_not_terminal(request)?;
    if request.status != SwapStatus::Pending {
        return Err(ServiceError::invalid_state(format!(
            "a counter-offer can only be made on a pending request, this one is {}",
            request.status
        )));
    }
    require(Some(party), Capability::CounterOffer, "make a counter-offer")?;

    if counter.owner_id != request.owner_id {
        return Err(ServiceError::validation(
            "counter_offered_book_id",
            "you can only counter with a book you own",
        ));
    }
    if counter.id == request.book_id || request.offered_book_id.as_deref() == Some(counter.id.as_str()) {
        return Err(ServiceError::validation(
            "counter_offered_book_id",
            "the counter-offer must be a different book",
        ));
    }
    if !counter.is_available {
        return Err(ServiceError::conflict("the counter-offered book is not available"));
    }
    let message = clean_text("message", message, MAX_MESSAGE_LEN)?;

    let mut after = request.clone();
    after.status = SwapStatus::CounterOffer;
    after.counter_offered_book_id = Some(counter.id.clone());
    after.counter_offer_message = message;

    Ok(Plan::between(Transition::Countered, party, request, after, now))
}

/// One accept command for both sides: the status decides who may use it.
pub fn plan_accept(request: &SwapRequest, actor: &str, now: OffsetDateTime) -> ServiceResult<Plan> {
    let party = acting_party(actor, request)?;
    ensure_not_terminal(request)?;

    match (request.status, party) {
        (SwapStatus::Pending, _) => require(Some(party), Capability::AcceptRequest, "accept this request")?,
        (SwapStatus::CounterOffer, Party::Requester) => {
            require(Some(party), Capability::AcceptCounterOffer, "accept this counter-offer")?
        }
        (SwapStatus::CounterOffer, Party::Owner) => {
            return Err(ServiceError::invalid_state(
                "only the requester can respond to a counter-offer",
            ))
        }
        (status, _) => {
            return Err(ServiceError::invalid_state(format!(
                "a request that is {status} cannot be accepted"
            )))
        }
    }

    let mut after = request.clone();
    after.status = SwapStatus::Accepted;
    let mut plan = Plan::between(Transition::Accepted, party, request, after, now);
    plan.guard = Some(Guard::TargetUncommitted {
        book_id: request.book_id.clone(),
        owner_id: request.owner_id.clone(),
    });
    Ok(plan)
}

/// Either party may withdraw until the request is accepted.
pub fn plan_cancel(request: &SwapRequest, actor: &str, now: OffsetDateTime) -> ServiceResult<Plan> {
    let party = acting_party(actor, request)?;
    ensure_not_terminal(request)?;
    if request.status == SwapStatus::Accepted {
        return Err(ServiceError::invalid_state(
            "an accepted request cannot be cancelled, it can only be completed",
        ));
    }
    require(Some(party), Capability::Cancel, "cancel this request")?;

    let mut after = request.clone();
    after.status = SwapStatus::Cancelled;
    Ok(Plan::between(Transition::Cancelled, party, request, after, now))
}

/// Record the actor's side of the exchange; the second side finalizes.
pub fn plan_complete(
    request: &SwapRequest,
    actor: &str,
    rating: Option<u8>,
    feedback: Option<String>,
    now: OffsetDateTime,
) -> ServiceResult<Plan> {
    let party = acting_party(actor, request)?;
    ensure_not_terminal(request)?;
    if request.status != SwapStatus::Accepted {
        return Err(ServiceError::invalid_state(format!(
            "only accepted requests can be completed, this one is {}",
            request.status
        )));
    }
    require(Some(party), Capability::Complete, "complete this request")?;

    let already_done = match party {
        Party::Requester => request.requester_completed_at.is_some(),
        Party::Owner => request.owner_completed_at.is_some(),
    };
    if already_done {
        return Err(ServiceError::invalid_state(
            "you have already confirmed this swap",
        ));
    }

    if let Some(rating) = rating {
        if !RATING_RANGE.contains(&rating) {
            return Err(ServiceError::validation(
                "rating",
                "rating must be between 1 and 5",
            ));
        }
    }
    let feedback = clean_text("feedback", feedback, MAX_FEEDBACK_LEN)?;

    let mut after = request.clone();
    match party {
        Party::Requester => {
            after.requester_completed_at = Some(now);
            after.requester_rating = rating;
            after.requester_feedback = feedback;
        }
        Party::Owner => {
            after.owner_completed_at = Some(now);
            after.owner_rating = rating;
            after.owner_feedback = feedback;
        }
    }

    let both_done = after.requester_completed_at.is_some() && after.owner_completed_at.is_some();
    if !both_done {
        return Ok(Plan::between(Transition::PartiallyCompleted, party, request, after, now));
    }

    after.status = SwapStatus::Completed;
    let mut plan = Plan::between(Transition::Completed, party, request, after, now);
    // exchanged books change hands instead of returning to the market
    plan.release = None;
    plan.transfer = Some(OwnershipTransfer {
        target_book_id: request.book_id.clone(),
        requester_id: request.requester_id.clone(),
        exchanged_book_id: request.exchanged_book().map(str::to_string),
        owner_id: request.owner_id.clone(),
    });
    Ok(plan)
}

/// Resolve the actor's role, refusing anyone who is not a party.
pub fn acting_party(actor: &str, request: &SwapRequest) -> ServiceResult<Party> {
    let party = party_of(actor, request);
    require(party, Capability::View, "view this request")?;
    party.ok_or_else(|| ServiceError::from(Denied::NotAParty))
}

fn ensure_not_terminal(request: &SwapRequest) -> ServiceResult<()> {
    if request.status.is_terminal() {
        return Err(ServiceError::invalid_state(format!(
            "request is already {}",
            request.status
        )));
    }
    Ok(())
}

fn clean_text(
    field: &'static str,
    text: Option<String>,
    max_len: usize,
) -> ServiceResult<Option<String>> {
    let Some(text) = text else {
        return Ok(None);
    };
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    if text.chars().count() > max_len {
        return Err(ServiceError::validation(
            field,
            format!("{field} must be at most {max_len} characters"),
        ));
    }
    Ok(Some(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::books::models::BookCondition;

    fn at() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    fn book(id: &str, owner: &str) -> Book {
        Book {
            id: id.to_string(),
            owner_id: owner.to_string(),
            title: id.to_uppercase(),
            authors: vec!["Anon".to_string()],
            condition: BookCondition::Good,
            description: None,
            is_available: true,
            created_at: at(),
            updated_at: at(),
        }
    }

    /// B asks for A's X, offering Y.
    fn pending() -> SwapRequest {
        plan_create(
            "r1".to_string(),
            "b",
            &book("x", "a"),
            Some(&book("y", "b")),
            Some("hi".to_string()),
            at(),
        )
        .unwrap()
        .request
    }

    fn apply(plan: Plan) -> SwapRequest {
        plan.request
    }

    #[test]
    fn held_book_table() {
        use SwapStatus::*;
        assert_eq!(held_book(Pending, Some("y"), None), Some("y"));
        assert_eq!(held_book(Pending, None, None), None);
        assert_eq!(held_book(CounterOffer, Some("y"), Some("z")), Some("z"));
        assert_eq!(held_book(Accepted, Some("y"), Some("z")), Some("z"));
        assert_eq!(held_book(Accepted, Some("y"), None), Some("y"));
        assert_eq!(held_book(Completed, Some("y"), Some("z")), None);
        assert_eq!(held_book(Cancelled, Some("y"), None), None);
    }

    #[test]
    fn create_reserves_the_offered_book() {
        let plan = plan_create(
            "r1".to_string(),
            "b",
            &book("x", "a"),
            Some(&book("y", "b")),
            None,
            at(),
        )
        .unwrap();
        assert_eq!(plan.request.status, SwapStatus::Pending);
        assert_eq!(plan.request.owner_id, "a");
        assert_eq!(plan.reserve.as_ref().map(|r| r.book_id.as_str()), Some("y"));
        assert_eq!(plan.recipients(), vec!["a"]);
    }

    #[test]
    fn create_rejections() {
        let own = plan_create("r".into(), "a", &book("x", "a"), None, None, at());
        assert!(matches!(own, Err(ServiceError::Validation { field: "book_id", .. })));

        let not_mine = plan_create("r".into(), "b", &book("x", "a"), Some(&book("y", "c")), None, at());
        assert!(matches!(
            not_mine,
            Err(ServiceError::Validation { field: "offered_book_id", .. })
        ));

        let mut taken = book("y", "b");
        taken.is_available = false;
        let unavailable = plan_create("r".into(), "b", &book("x", "a"), Some(&taken), None, at());
        assert!(matches!(unavailable, Err(ServiceError::Conflict { .. })));

        let long = "m".repeat(MAX_MESSAGE_LEN + 1);
        let too_long = plan_create("r".into(), "b", &book("x", "a"), None, Some(long), at());
        assert!(matches!(too_long, Err(ServiceError::Validation { field: "message", .. })));
    }

    #[test]
    fn counter_offer_swaps_the_held_book() {
        let request = pending();
        let plan = plan_counter_offer(&request, "a", &book("z", "a"), Some("how about".into()), at()).unwrap();

        assert_eq!(plan.request.status, SwapStatus::CounterOffer);
        assert_eq!(plan.request.version, request.version + 1);
        assert_eq!(plan.release.as_deref(), Some("y"));
        assert_eq!(
            plan.reserve,
            Some(Reservation {
                book_id: "z".into(),
                owner_id: "a".into()
            })
        );
        assert_eq!(plan.recipients(), vec!["b"]);
    }

    #[test]
    fn counter_offer_rules() {
        let request = pending();
        assert!(matches!(
            plan_counter_offer(&request, "b", &book("z", "a"), None, at()),
            Err(ServiceError::Forbidden { is_party: true, .. })
        ));
        assert!(matches!(
            plan_counter_offer(&request, "a", &book("y", "a"), None, at()),
            Err(ServiceError::Validation { .. })
        ));
        assert!(matches!(
            plan_counter_offer(&request, "a", &book("x", "a"), None, at()),
            Err(ServiceError::Validation { .. })
        ));

        let countered = apply(plan_counter_offer(&request, "a", &book("z", "a"), None, at()).unwrap());
        assert!(matches!(
            plan_counter_offer(&countered, "a", &book("w", "a"), None, at()),
            Err(ServiceError::InvalidState { .. })
        ));
        assert!(matches!(
            plan_counter_offer(&countered, "b", &book("w", "a"), None, at()),
            Err(ServiceError::InvalidState { .. })
        ));
    }

    #[test]
    fn unified_accept_is_gated_by_status() {
        let request = pending();
        assert!(matches!(
            plan_accept(&request, "b", at()),
            Err(ServiceError::Forbidden { is_party: true, .. })
        ));
        let accepted = plan_accept(&request, "a", at()).unwrap();
        assert_eq!(accepted.request.status, SwapStatus::Accepted);
        assert_eq!(accepted.reserve, None);
        assert_eq!(accepted.release, None);
        assert_eq!(accepted.recipients(), vec!["b"]);

        let countered = apply(plan_counter_offer(&request, "a", &book("z", "a"), None, at()).unwrap());
        assert!(matches!(
            plan_accept(&countered, "a", at()),
            Err(ServiceError::InvalidState { .. })
        ));
        let plan = plan_accept(&countered, "b", at()).unwrap();
        assert_eq!(plan.request.held_book(), Some("z"));
        assert_eq!(plan.recipients(), vec!["a"]);
    }

    #[test]
    fn strangers_are_not_parties() {
        let request = pending();
        for result in [
            plan_accept(&request, "mallory", at()),
            plan_cancel(&request, "mallory", at()),
            plan_complete(&request, "mallory", None, None, at()),
        ] {
            assert!(matches!(
                result,
                Err(ServiceError::Forbidden { is_party: false, .. })
            ));
        }
        assert!(capabilities("mallory", &request).is_empty());
        assert!(capabilities("a", &request).contains(Capability::CounterOffer));
        assert!(!capabilities("b", &request).contains(Capability::CounterOffer));
    }

    #[test]
    fn cancel_releases_and_notifies_the_other_side() {
        let request = pending();
        let by_owner = plan_cancel(&request, "a", at()).unwrap();
        assert_eq!(by_owner.release.as_deref(), Some("y"));
        assert_eq!(by_owner.recipients(), vec!["b"]);

        let countered = apply(plan_counter_offer(&request, "a", &book("z", "a"), None, at()).unwrap());
        let by_requester = plan_cancel(&countered, "b", at()).unwrap();
        assert_eq!(by_requester.release.as_deref(), Some("z"));
        assert_eq!(by_requester.recipients(), vec!["a"]);

        let accepted = apply(plan_accept(&request, "a", at()).unwrap());
        assert!(matches!(
            plan_cancel(&accepted, "a", at()),
            Err(ServiceError::InvalidState { .. })
        ));
    }

    #[test]
    fn completion_is_order_independent() {
        let accepted = apply(plan_accept(&pending(), "a", at()).unwrap());

        let finish = |first: &str, second: &str| {
            let half = plan_complete(&accepted, first, Some(5), None, at()).unwrap();
            assert_eq!(half.transition, Transition::PartiallyCompleted);
            assert_eq!(half.request.status, SwapStatus::Accepted);
            plan_complete(&half.request, second, Some(4), None, at()).unwrap()
        };

        let one = finish("b", "a");
        let two = finish("a", "b");
        for plan in [&one, &two] {
            assert_eq!(plan.transition, Transition::Completed);
            assert_eq!(plan.request.status, SwapStatus::Completed);
            assert_eq!(plan.release, None);
            assert_eq!(
                plan.transfer,
                Some(OwnershipTransfer {
                    target_book_id: "x".into(),
                    requester_id: "b".into(),
                    exchanged_book_id: Some("y".into()),
                    owner_id: "a".into(),
                })
            );
            assert_eq!(plan.recipients(), vec!["b", "a"]);
        }
        assert_eq!(one.request.version, two.request.version);
    }

    #[test]
    fn completion_rules() {
        let request = pending();
        assert!(matches!(
            plan_complete(&request, "a", None, None, at()),
            Err(ServiceError::InvalidState { .. })
        ));

        let accepted = apply(plan_accept(&request, "a", at()).unwrap());
        assert!(matches!(
            plan_complete(&accepted, "b", Some(6), None, at()),
            Err(ServiceError::Validation { field: "rating", .. })
        ));

        let half = apply(plan_complete(&accepted, "b", Some(5), Some(" great ".into()), at()).unwrap());
        assert_eq!(half.requester_rating, Some(5));
        assert_eq!(half.requester_feedback.as_deref(), Some("great"));
        assert!(matches!(
            plan_complete(&half, "b", None, None, at()),
            Err(ServiceError::InvalidState { .. })
        ));

        let done = apply(plan_complete(&half, "a", None, None, at()).unwrap());
        for result in [
            plan_accept(&done, "a", at()),
            plan_cancel(&done, "b", at()),
            plan_complete(&done, "a", None, None, at()),
            plan_counter_offer(&done, "a", &book("z", "a"), None, at()),
        ] {
            assert!(matches!(result, Err(ServiceError::InvalidState { .. })));
        }
    }

    #[test]
    fn command_wire_format() {
        let cmd: SwapCommand = serde_json::from_str(
            r#"{"type":"complete","request_id":"r1","rating":5}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            SwapCommand::Complete {
                request_id: "r1".into(),
                rating: Some(5),
                feedback: None
            }
        );
        assert!(serde_json::from_str::<SwapCommand>(r#"{"type":"reject","request_id":"r1"}"#).is_err());
    }
}

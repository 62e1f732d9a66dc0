//! Engine tests against a real (in-memory or file) database.

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;

use super::models::{SwapRequest, SwapStatus};
use super::repo;
use super::state::{self, SwapCommand, Transition};
use crate::error::ServiceError;
use crate::modules::books::models::Book;
use crate::modules::notifications::models::NotificationDraft;
use crate::modules::notifications::NotificationSink;
use crate::test_support::{book_draft, TestEnv};

struct Shelf {
    x: Book,
    y: Book,
    z: Book,
}

/// Alice owns X and Z, Bob owns Y.
async fn shelf(env: &TestEnv) -> Shelf {
    Shelf {
        x: env.books.create_book("alice", book_draft("X")).await.unwrap(),
        y: env.books.create_book("bob", book_draft("Y")).await.unwrap(),
        z: env.books.create_book("alice", book_draft("Z")).await.unwrap(),
    }
}

async fn available(env: &TestEnv, book: &Book) -> bool {
    env.books.get_book(&book.id).await.unwrap().is_available
}

async fn owner(env: &TestEnv, book: &Book) -> String {
    env.books.get_book(&book.id).await.unwrap().owner_id
}

fn is_invalid_state<T: std::fmt::Debug>(result: &Result<T, ServiceError>) -> bool {
    matches!(result, Err(ServiceError::InvalidState { .. }))
}

fn is_conflict<T: std::fmt::Debug>(result: &Result<T, ServiceError>) -> bool {
    matches!(result, Err(ServiceError::Conflict { .. }))
}

#[tokio::test]
async fn counter_offer_walkthrough() {
    let env = TestEnv::new().await;
    let Shelf { x, y, z } = shelf(&env).await;

    let request = env
        .swaps
        .create_swap_request("bob", &x.id, Some(&y.id), Some("trade?"))
        .await
        .unwrap();
    assert_eq!(request.status, SwapStatus::Pending);
    assert!(!available(&env, &y).await);
    assert!(available(&env, &x).await);

    let countered = env
        .swaps
        .create_counter_offer(&request.id, "alice", &z.id, None)
        .await
        .unwrap();
    assert_eq!(countered.status, SwapStatus::CounterOffer);
    assert!(available(&env, &y).await);
    assert!(!available(&env, &z).await);

    let accepted = env.swaps.accept_swap_request(&request.id, "bob").await.unwrap();
    assert_eq!(accepted.status, SwapStatus::Accepted);
    assert!(!available(&env, &z).await);
    assert!(available(&env, &x).await, "target stays with its owner until exchange");

    let half = env
        .swaps
        .complete_swap_request(&request.id, "bob", Some(5), None)
        .await
        .unwrap();
    assert_eq!(half.status, SwapStatus::Accepted);
    assert!(half.requester_completed_at.is_some());
    assert!(half.owner_completed_at.is_none());

    let done = env
        .swaps
        .complete_swap_request(&request.id, "alice", Some(4), Some("smooth"))
        .await
        .unwrap();
    assert_eq!(done.status, SwapStatus::Completed);
    assert_eq!(done.requester_rating, Some(5));
    assert_eq!(done.owner_rating, Some(4));
    assert_eq!(owner(&env, &x).await, "bob");
    assert_eq!(owner(&env, &z).await, "alice");
    assert_eq!(owner(&env, &y).await, "bob");
    assert!(available(&env, &y).await);
}

#[tokio::test]
async fn accepted_requests_cannot_be_cancelled() {
    let env = TestEnv::new().await;
    let Shelf { x, y, .. } = shelf(&env).await;

    let request = env
        .swaps
        .create_swap_request("bob", &x.id, Some(&y.id), None)
        .await
        .unwrap();
    env.swaps.accept_swap_request(&request.id, "alice").await.unwrap();

    assert!(is_invalid_state(&env.swaps.cancel_swap_request(&request.id, "alice").await));
    assert!(is_invalid_state(&env.swaps.cancel_swap_request(&request.id, "bob").await));
    assert!(!available(&env, &y).await);
}

#[tokio::test]
async fn completion_order_does_not_matter() {
    let env = TestEnv::new().await;
    let Shelf { x, y, .. } = shelf(&env).await;

    let request = env
        .swaps
        .create_swap_request("bob", &x.id, Some(&y.id), None)
        .await
        .unwrap();
    env.swaps.accept_swap_request(&request.id, "alice").await.unwrap();
    env.swaps
        .complete_swap_request(&request.id, "alice", None, None)
        .await
        .unwrap();
    let done = env
        .swaps
        .complete_swap_request(&request.id, "bob", None, None)
        .await
        .unwrap();

    assert_eq!(done.status, SwapStatus::Completed);
    assert_eq!(owner(&env, &x).await, "bob");
    assert_eq!(owner(&env, &y).await, "alice");
    assert!(!available(&env, &x).await);
    assert!(!available(&env, &y).await);
}

#[tokio::test]
async fn confirming_twice_is_rejected() {
    let env = TestEnv::new().await;
    let Shelf { x, .. } = shelf(&env).await;

    let request = env.swaps.create_swap_request("bob", &x.id, None, None).await.unwrap();
    env.swaps.accept_swap_request(&request.id, "alice").await.unwrap();
    env.swaps
        .complete_swap_request(&request.id, "bob", Some(3), None)
        .await
        .unwrap();

    let again = env
        .swaps
        .complete_swap_request(&request.id, "bob", Some(1), None)
        .await;
    assert!(is_invalid_state(&again));

    let stored = env.swaps.get_swap_request(&request.id, "bob").await.unwrap();
    assert_eq!(stored.request.requester_rating, Some(3));
    assert_eq!(stored.request.status, SwapStatus::Accepted);
}

#[tokio::test]
async fn terminal_requests_reject_every_command() {
    let env = TestEnv::new().await;
    let Shelf { x, y, z } = shelf(&env).await;

    let request = env
        .swaps
        .create_swap_request("bob", &x.id, Some(&y.id), None)
        .await
        .unwrap();
    env.swaps.cancel_swap_request(&request.id, "alice").await.unwrap();

    assert!(is_invalid_state(&env.swaps.accept_swap_request(&request.id, "alice").await));
    assert!(is_invalid_state(&env.swaps.cancel_swap_request(&request.id, "bob").await));
    assert!(is_invalid_state(
        &env.swaps
            .create_counter_offer(&request.id, "alice", &z.id, None)
            .await
    ));
    assert!(is_invalid_state(
        &env.swaps
            .complete_swap_request(&request.id, "bob", None, None)
            .await
    ));
    assert!(available(&env, &z).await);
}

#[tokio::test]
async fn held_book_is_released_exactly_once() {
    let env = TestEnv::new().await;
    let Shelf { x, y, .. } = shelf(&env).await;

    let request = env
        .swaps
        .create_swap_request("bob", &x.id, Some(&y.id), None)
        .await
        .unwrap();
    env.swaps.cancel_swap_request(&request.id, "bob").await.unwrap();
    assert!(available(&env, &y).await);

    // bob delists Y; a repeated cancel must not put it back
    env.books.set_availability(&y.id, false, "bob").await.unwrap();
    assert!(is_invalid_state(&env.swaps.cancel_swap_request(&request.id, "bob").await));
    assert!(!available(&env, &y).await);
}

#[tokio::test]
async fn unavailable_books_cannot_be_offered_or_requested() {
    let env = TestEnv::new().await;
    let Shelf { x, y, z } = shelf(&env).await;

    env.books.set_availability(&y.id, false, "bob").await.unwrap();
    assert!(is_conflict(
        &env.swaps.create_swap_request("bob", &x.id, Some(&y.id), None).await
    ));

    env.books.set_availability(&y.id, true, "bob").await.unwrap();
    env.swaps
        .create_swap_request("bob", &x.id, Some(&y.id), None)
        .await
        .unwrap();
    // Y is now held by the first request
    assert!(is_conflict(
        &env.swaps.create_swap_request("bob", &z.id, Some(&y.id), None).await
    ));

    env.books.set_availability(&z.id, false, "alice").await.unwrap();
    assert!(is_conflict(&env.swaps.create_swap_request("bob", &z.id, None, None).await));
}

#[tokio::test]
async fn invalid_creations_are_validation_errors() {
    let env = TestEnv::new().await;
    let Shelf { x, y, z } = shelf(&env).await;

    assert!(matches!(
        env.swaps.create_swap_request("alice", &x.id, None, None).await,
        Err(ServiceError::Validation { .. })
    ));
    assert!(matches!(
        env.swaps.create_swap_request("bob", &x.id, Some(&z.id), None).await,
        Err(ServiceError::Validation { .. })
    ));
    assert!(matches!(
        env.swaps.create_swap_request("bob", "missing", Some(&y.id), None).await,
        Err(ServiceError::NotFound { .. })
    ));
    let long = "a".repeat(state::MAX_MESSAGE_LEN + 1);
    assert!(matches!(
        env.swaps.create_swap_request("bob", &x.id, None, Some(&long)).await,
        Err(ServiceError::Validation { .. })
    ));
    assert!(available(&env, &y).await);
}

#[tokio::test]
async fn roles_are_enforced() {
    let env = TestEnv::new().await;
    let Shelf { x, y, z } = shelf(&env).await;

    let request = env
        .swaps
        .create_swap_request("bob", &x.id, Some(&y.id), None)
        .await
        .unwrap();

    assert!(matches!(
        env.swaps.accept_swap_request(&request.id, "mallory").await,
        Err(ServiceError::Forbidden { is_party: false, .. })
    ));
    assert!(matches!(
        env.swaps.get_swap_request(&request.id, "mallory").await,
        Err(ServiceError::Forbidden { is_party: false, .. })
    ));
    assert!(matches!(
        env.swaps.accept_swap_request(&request.id, "bob").await,
        Err(ServiceError::Forbidden { is_party: true, .. })
    ));

    env.swaps
        .create_counter_offer(&request.id, "alice", &z.id, None)
        .await
        .unwrap();
    // the owner cannot accept their own counter-offer
    assert!(is_invalid_state(&env.swaps.accept_swap_request(&request.id, "alice").await));
}

#[tokio::test]
async fn completing_a_swap_cancels_rival_requests() {
    let env = TestEnv::new().await;
    let Shelf { x, y, .. } = shelf(&env).await;
    let w = env.books.create_book("carol", book_draft("W")).await.unwrap();

    let winner = env
        .swaps
        .create_swap_request("bob", &x.id, Some(&y.id), None)
        .await
        .unwrap();
    let rival = env
        .swaps
        .create_swap_request("carol", &x.id, Some(&w.id), None)
        .await
        .unwrap();
    assert!(!available(&env, &w).await);

    env.swaps.accept_swap_request(&winner.id, "alice").await.unwrap();
    // X is promised to bob now
    assert!(is_conflict(&env.swaps.accept_swap_request(&rival.id, "alice").await));

    let mut events = env.swaps.events().subscribe();
    env.swaps
        .complete_swap_request(&winner.id, "bob", None, None)
        .await
        .unwrap();
    env.swaps
        .complete_swap_request(&winner.id, "alice", None, None)
        .await
        .unwrap();

    let rival = env.swaps.get_swap_request(&rival.id, "carol").await.unwrap().request;
    assert_eq!(rival.status, SwapStatus::Cancelled);
    assert!(available(&env, &w).await);

    let kinds: Vec<(Transition, String)> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| (e.kind, e.request.id))
        .collect();
    assert!(kinds.contains(&(Transition::Completed, winner.id.clone())));
    assert!(kinds.contains(&(Transition::Cancelled, rival.id.clone())));

    let carol = env.notifications.list_notifications("carol", false).await.unwrap();
    assert!(carol
        .iter()
        .any(|n| n.kind == Transition::Cancelled && n.request_id == rival.id));
}

#[tokio::test]
async fn stale_plan_loses_the_version_race() {
    let env = TestEnv::new().await;
    let Shelf { x, y, .. } = shelf(&env).await;

    let request = env
        .swaps
        .create_swap_request("bob", &x.id, Some(&y.id), None)
        .await
        .unwrap();

    let now = OffsetDateTime::now_utc();
    let accept = state::plan_accept(&request, "alice", now).unwrap();
    let cancel = state::plan_cancel(&request, "bob", now).unwrap();

    env.db
        .call(move |conn| repo::apply_plan(conn, &accept, now))
        .await
        .unwrap();
    let lost = env
        .db
        .call(move |conn| repo::apply_plan(conn, &cancel, now))
        .await;
    assert!(matches!(lost, Err(ServiceError::Conflict { .. })));

    let stored = env.swaps.get_swap_request(&request.id, "bob").await.unwrap().request;
    assert_eq!(stored.status, SwapStatus::Accepted);
    assert_eq!(stored.version, request.version + 1);
    assert!(!available(&env, &y).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_instances_agree_on_one_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.db");
    let first = TestEnv::on_file(&path).await;
    let second = TestEnv::on_file(&path).await;

    let Shelf { x, y, .. } = shelf(&first).await;
    let request = first
        .swaps
        .create_swap_request("bob", &x.id, Some(&y.id), None)
        .await
        .unwrap();

    let (accepted, cancelled) = tokio::join!(
        first.swaps.accept_swap_request(&request.id, "alice"),
        second.swaps.cancel_swap_request(&request.id, "bob"),
    );
    assert!(
        accepted.is_ok() ^ cancelled.is_ok(),
        "exactly one transition wins: {accepted:?} / {cancelled:?}"
    );

    let loser_ok = |r: &Result<SwapRequest, ServiceError>| {
        r.is_ok() || is_conflict(r) || is_invalid_state(r)
    };
    assert!(loser_ok(&accepted) && loser_ok(&cancelled));

    let stored = second.swaps.get_swap_request(&request.id, "alice").await.unwrap().request;
    if accepted.is_ok() {
        assert_eq!(stored.status, SwapStatus::Accepted);
        assert!(!available(&second, &y).await);
    } else {
        assert_eq!(stored.status, SwapStatus::Cancelled);
        assert!(available(&second, &y).await);
    }
}

struct FailingSink;

#[async_trait]
impl NotificationSink for FailingSink {
    async fn deliver(&self, _draft: &NotificationDraft) -> anyhow::Result<()> {
        anyhow::bail!("smtp relay refused the connection")
    }
}

#[tokio::test]
async fn notification_failures_never_undo_a_transition() {
    let env = TestEnv::with_sink(Arc::new(FailingSink)).await;
    let Shelf { x, y, .. } = shelf(&env).await;

    let request = env
        .swaps
        .create_swap_request("bob", &x.id, Some(&y.id), None)
        .await
        .unwrap();
    let accepted = env.swaps.accept_swap_request(&request.id, "alice").await.unwrap();

    assert_eq!(accepted.status, SwapStatus::Accepted);
    assert!(env.notifications.list_notifications("alice", false).await.unwrap().is_empty());
}

#[tokio::test]
async fn commands_route_to_the_same_transitions() {
    let env = TestEnv::new().await;
    let Shelf { x, y, .. } = shelf(&env).await;

    let created = env
        .swaps
        .execute(
            "bob",
            SwapCommand::Create {
                book_id: x.id.clone(),
                offered_book_id: Some(y.id.clone()),
                message: None,
            },
        )
        .await
        .unwrap();
    let accepted = env
        .swaps
        .execute(
            "alice",
            SwapCommand::Accept {
                request_id: created.id.clone(),
            },
        )
        .await
        .unwrap();
    assert_eq!(accepted.status, SwapStatus::Accepted);
    assert_eq!(accepted.version, created.version + 1);
}

#[tokio::test]
async fn listing_and_statistics_reflect_each_side() {
    let env = TestEnv::new().await;
    let Shelf { x, y, z } = shelf(&env).await;

    let done = env
        .swaps
        .create_swap_request("bob", &x.id, Some(&y.id), None)
        .await
        .unwrap();
    env.swaps.accept_swap_request(&done.id, "alice").await.unwrap();
    env.swaps
        .complete_swap_request(&done.id, "bob", Some(5), None)
        .await
        .unwrap();
    env.swaps
        .complete_swap_request(&done.id, "alice", Some(4), None)
        .await
        .unwrap();
    env.swaps.create_swap_request("bob", &z.id, None, None).await.unwrap();

    let alice = env.swaps.get_swap_statistics("alice").await.unwrap();
    assert_eq!(alice.total_completed, 1);
    assert_eq!(alice.total_pending, 1);
    assert_eq!(alice.total_incoming, 2);
    assert_eq!(alice.total_outgoing, 0);
    assert_eq!(alice.average_rating_received, Some(5.0));
    assert_eq!(alice.ratings_received, 1);

    let bob = env.swaps.get_swap_statistics("bob").await.unwrap();
    assert_eq!(bob.total_outgoing, 2);
    assert_eq!(bob.average_rating_received, Some(4.0));

    let lists = env.swaps.get_swap_requests_for_user("alice").await.unwrap();
    assert_eq!(lists.incoming.len(), 2);
    assert!(lists.outgoing.is_empty());
    assert!(lists
        .incoming
        .iter()
        .any(|v| v.book.as_ref().map(|b| b.title.as_str()) == Some("X")));

    let empty = env.swaps.get_swap_statistics("nobody").await.unwrap();
    assert_eq!(empty.total_completed, 0);
    assert_eq!(empty.average_rating_received, None);
}

#[tokio::test]
async fn one_live_request_per_requester_and_target() {
    let env = TestEnv::new().await;
    let Shelf { x, y, .. } = shelf(&env).await;
    let spare = env.books.create_book("bob", book_draft("Spare")).await.unwrap();

    env.swaps
        .create_swap_request("bob", &x.id, Some(&y.id), None)
        .await
        .unwrap();

    let again = env
        .swaps
        .create_swap_request("bob", &x.id, Some(&spare.id), None)
        .await;
    assert!(is_conflict(&again), "{again:?}");
    assert!(available(&env, &spare).await, "rolled-back insert keeps the offer free");

    let bare = env.swaps.create_swap_request("bob", &x.id, None, None).await;
    assert!(is_conflict(&bare), "{bare:?}");

    let mine = env.swaps.get_swap_requests_for_user("bob").await.unwrap();
    assert_eq!(mine.outgoing.len(), 1);
}

#[tokio::test]
async fn same_snapshot_creations_cannot_share_an_offered_book() {
    let env = TestEnv::new().await;
    let Shelf { x, y, z } = shelf(&env).await;

    let now = OffsetDateTime::now_utc();
    let for_x = state::plan_create(uuid::Uuid::now_v7().to_string(), "bob", &x, Some(&y), None, now)
        .unwrap();
    let for_z = state::plan_create(uuid::Uuid::now_v7().to_string(), "bob", &z, Some(&y), None, now)
        .unwrap();

    env.db
        .call(move |conn| repo::apply_plan(conn, &for_x, now))
        .await
        .unwrap();
    let lost = env
        .db
        .call(move |conn| repo::apply_plan(conn, &for_z, now))
        .await;
    assert!(is_conflict(&lost), "{lost:?}");

    let mine = env.swaps.get_swap_requests_for_user("bob").await.unwrap();
    assert_eq!(mine.outgoing.len(), 1);
    assert_eq!(mine.outgoing[0].request.book_id, x.id);
    assert!(!available(&env, &y).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_creations_hold_an_offered_book_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offers.db");
    let first = TestEnv::on_file(&path).await;
    let second = TestEnv::on_file(&path).await;

    let Shelf { x, y, z } = shelf(&first).await;

    let (for_x, for_z) = tokio::join!(
        first.swaps.create_swap_request("bob", &x.id, Some(&y.id), None),
        second.swaps.create_swap_request("bob", &z.id, Some(&y.id), None),
    );
    assert!(
        for_x.is_ok() ^ for_z.is_ok(),
        "exactly one creation wins: {for_x:?} / {for_z:?}"
    );
    assert!(for_x.is_ok() || is_conflict(&for_x));
    assert!(for_z.is_ok() || is_conflict(&for_z));

    let winner = match (&for_x, &for_z) {
        (Ok(request), _) | (_, Ok(request)) => request.clone(),
        _ => unreachable!(),
    };
    assert_eq!(winner.status, SwapStatus::Pending);
    assert_eq!(winner.offered_book_id.as_deref(), Some(y.id.as_str()));
    assert!(!available(&second, &y).await);
}

#[tokio::test]
async fn counter_offer_needs_an_available_book() {
    let env = TestEnv::new().await;
    let Shelf { x, y, z } = shelf(&env).await;

    let request = env
        .swaps
        .create_swap_request("bob", &x.id, Some(&y.id), None)
        .await
        .unwrap();
    env.books.set_availability(&z.id, false, "alice").await.unwrap();

    let countered = env
        .swaps
        .create_counter_offer(&request.id, "alice", &z.id, None)
        .await;
    assert!(is_conflict(&countered), "{countered:?}");

    let stored = env.swaps.get_swap_request(&request.id, "bob").await.unwrap().request;
    assert_eq!(stored.status, SwapStatus::Pending);
    assert_eq!(stored.version, request.version);
    assert!(!available(&env, &y).await);
}

#[tokio::test]
async fn promised_targets_cannot_be_offered_elsewhere() {
    let env = TestEnv::new().await;
    let Shelf { x, .. } = shelf(&env).await;
    let carols = env.books.create_book("carol", book_draft("C")).await.unwrap();

    let request = env
        .swaps
        .create_swap_request("bob", &x.id, None, None)
        .await
        .unwrap();
    env.swaps.accept_swap_request(&request.id, "alice").await.unwrap();
    assert!(available(&env, &x).await);

    let offered = env
        .swaps
        .create_swap_request("alice", &carols.id, Some(&x.id), None)
        .await;
    assert!(is_conflict(&offered), "{offered:?}");
    assert!(available(&env, &x).await);
    assert!(env.swaps.get_swap_requests_for_user("alice").await.unwrap().outgoing.is_empty());
}

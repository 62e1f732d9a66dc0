//! The swap request engine: snapshot, decide, commit, then tell people.

use rusqlite::Connection;
use shelfswap_db::Database;
use shelfswap_events::EventBus;
use time::OffsetDateTime;
use uuid::Uuid;

use super::models::{SwapEvent, SwapRequest, SwapRequestView, SwapStatistics, UserSwapRequests};
use super::repo;
use super::state::{self, Plan, SwapCommand, Transition};
use crate::error::{ServiceError, ServiceResult};
use crate::modules::books::{models::Book, repo as books};
use crate::modules::notifications::models::{NotificationDraft, NotificationPayload};
use crate::modules::notifications::Dispatcher;
use crate::modules::users::repo as users;

/// Everything the engine learned while committing, gathered before the
/// connection is released so delivery never touches the database.
struct Committed {
    plan: Plan,
    books: Vec<Book>,
    superseded: Vec<(SwapRequest, Vec<Book>)>,
    actor_name: String,
}

#[derive(Debug, Clone)]
pub struct SwapEngine {
    db: Database,
    dispatcher: Dispatcher,
    events: EventBus<SwapEvent>,
}

impl SwapEngine {
    pub fn new(db: Database, dispatcher: Dispatcher, events: EventBus<SwapEvent>) -> Self {
        Self {
            db,
            dispatcher,
            events,
        }
    }

    /// Bus carrying one [`SwapEvent`] per committed transition.
    pub fn events(&self) -> &EventBus<SwapEvent> {
        &self.events
    }

    /// Run any command on behalf of `actor`.
    pub async fn execute(&self, actor: &str, command: SwapCommand) -> ServiceResult<SwapRequest> {
        match command {
            SwapCommand::Create {
                book_id,
                offered_book_id,
                message,
            } => {
                self.create_swap_request(actor, &book_id, offered_book_id.as_deref(), message.as_deref())
                    .await
            }
            SwapCommand::CounterOffer {
                request_id,
                counter_offered_book_id,
                message,
            } => {
                self.create_counter_offer(&request_id, actor, &counter_offered_book_id, message.as_deref())
                    .await
            }
            SwapCommand::Accept { request_id } => self.accept_swap_request(&request_id, actor).await,
            SwapCommand::Cancel { request_id } => self.cancel_swap_request(&request_id, actor).await,
            SwapCommand::Complete {
                request_id,
                rating,
                feedback,
            } => {
                self.complete_swap_request(&request_id, actor, rating, feedback.as_deref())
                    .await
            }
        }
    }

    pub async fn create_swap_request(
        &self,
        requester_id: &str,
        book_id: &str,
        offered_book_id: Option<&str>,
        message: Option<&str>,
    ) -> ServiceResult<SwapRequest> {
        let target_id = book_id.to_string();
        let offered_id = offered_book_id.map(str::to_string);
        let (target, offered) = self
            .db
            .call(move |conn| {
                let target = load_book(conn, &target_id)?;
                let offered = offered_id.map(|id| load_book(conn, &id)).transpose()?;
                Ok::<_, ServiceError>((target, offered))
            })
            .await?;

        let plan = state::plan_create(
            Uuid::now_v7().to_string(),
            requester_id,
            &target,
            offered.as_ref(),
            message.map(str::to_string),
            OffsetDateTime::now_utc(),
        )?;
        self.commit(plan).await
    }

    pub async fn create_counter_offer(
        &self,
        request_id: &str,
        owner_id: &str,
        counter_book_id: &str,
        message: Option<&str>,
    ) -> ServiceResult<SwapRequest> {
        let id = request_id.to_string();
        let actor = owner_id.to_string();
        let counter_id = counter_book_id.to_string();
        let (request, counter) = self
            .db
            .call(move |conn| {
                let request = load_request(conn, &id)?;
                // strangers learn nothing about the book either
                state::acting_party(&actor, &request)?;
                let counter = load_book(conn, &counter_id)?;
                Ok::<_, ServiceError>((request, counter))
            })
            .await?;

        let plan = state::plan_counter_offer(
            &request,
            owner_id,
            &counter,
            message.map(str::to_string),
            OffsetDateTime::now_utc(),
        )?;
        self.commit(plan).await
    }

    /// Owner accepts a PENDING request, or requester accepts a COUNTER_OFFER.
    pub async fn accept_swap_request(&self, request_id: &str, actor: &str) -> ServiceResult<SwapRequest> {
        let request = self.snapshot(request_id).await?;
        let plan = state::plan_accept(&request, actor, OffsetDateTime::now_utc())?;
        self.commit(plan).await
    }

    pub async fn cancel_swap_request(&self, request_id: &str, actor: &str) -> ServiceResult<SwapRequest> {
        let request = self.snapshot(request_id).await?;
        let plan = state::plan_cancel(&request, actor, OffsetDateTime::now_utc())?;
        self.commit(plan).await
    }

    pub async fn complete_swap_request(
        &self,
        request_id: &str,
        actor: &str,
        rating: Option<u8>,
        feedback: Option<&str>,
    ) -> ServiceResult<SwapRequest> {
        let request = self.snapshot(request_id).await?;
        let plan = state::plan_complete(
            &request,
            actor,
            rating,
            feedback.map(str::to_string),
            OffsetDateTime::now_utc(),
        )?;
        self.commit(plan).await
    }

    /// One request with its joined views, visible to its two parties only.
    pub async fn get_swap_request(&self, request_id: &str, actor: &str) -> ServiceResult<SwapRequestView> {
        let id = request_id.to_string();
        let actor = actor.to_string();
        self.db
            .call(move |conn| {
                let request = load_request(conn, &id)?;
                state::acting_party(&actor, &request)?;
                Ok(repo::view(conn, request)?)
            })
            .await
    }

    pub async fn get_swap_requests_for_user(&self, user_id: &str) -> ServiceResult<UserSwapRequests> {
        let user = user_id.to_string();
        self.db
            .call(move |conn| repo::requests_for_user(conn, &user).map_err(ServiceError::from))
            .await
    }

    pub async fn get_swap_statistics(&self, user_id: &str) -> ServiceResult<SwapStatistics> {
        let user = user_id.to_string();
        self.db
            .call(move |conn| repo::statistics(conn, &user).map_err(ServiceError::from))
            .await
    }

    async fn snapshot(&self, request_id: &str) -> ServiceResult<SwapRequest> {
        let id = request_id.to_string();
        self.db.call(move |conn| load_request(conn, &id)).await
    }

    /// Apply `plan` atomically, then publish and notify.
    async fn commit(&self, plan: Plan) -> ServiceResult<SwapRequest> {
        let now = plan.request.updated_at;
        let committed = self
            .db
            .call(move |conn| {
                let applied = repo::apply_plan(conn, &plan, now)?;
                let books = touched_books(conn, &plan.request)?;
                let superseded = applied
                    .superseded
                    .into_iter()
                    .map(|r| {
                        let books = touched_books(conn, &r)?;
                        Ok((r, books))
                    })
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                let actor_id = match plan.actor {
                    shelfswap_authz::Party::Requester => &plan.request.requester_id,
                    shelfswap_authz::Party::Owner => &plan.request.owner_id,
                };
                let actor_name = users::summary(conn, actor_id)?.display_name;
                Ok::<_, ServiceError>(Committed {
                    plan,
                    books,
                    superseded,
                    actor_name,
                })
            })
            .await
            .inspect_err(|e| {
                tracing::debug!(error = %e, "swap transition rejected at commit");
            })?;

        let request = committed.plan.request.clone();
        tracing::info!(
            request_id = %request.id,
            transition = %committed.plan.transition,
            actor = committed.plan.actor.as_str(),
            status = %request.status,
            version = request.version,
            "swap request transition committed"
        );

        self.announce(committed).await;
        Ok(request)
    }

    async fn announce(&self, committed: Committed) {
        let Committed {
            plan,
            books,
            superseded,
            actor_name,
        } = committed;

        let mut drafts: Vec<NotificationDraft> = plan
            .recipients()
            .into_iter()
            .map(|recipient| NotificationDraft {
                recipient_id: recipient.to_string(),
                kind: plan.transition,
                request_id: plan.request.id.clone(),
                payload: payload_for(&plan.request, &books, &actor_name),
            })
            .collect();

        self.events.publish(SwapEvent {
            kind: plan.transition,
            request: plan.request,
            books,
        });

        for (request, books) in superseded {
            drafts.push(NotificationDraft {
                recipient_id: request.requester_id.clone(),
                kind: Transition::Cancelled,
                request_id: request.id.clone(),
                payload: payload_for(&request, &books, &actor_name),
            });
            self.events.publish(SwapEvent {
                kind: Transition::Cancelled,
                request,
                books,
            });
        }

        self.dispatcher.dispatch(drafts).await;
    }
}

fn load_request(conn: &Connection, id: &str) -> ServiceResult<SwapRequest> {
    repo::get_swap(conn, id)?.ok_or_else(|| ServiceError::not_found("swap request", id))
}

fn load_book(conn: &Connection, id: &str) -> ServiceResult<Book> {
    books::get_book(conn, id)?.ok_or_else(|| ServiceError::not_found("book", id))
}

/// Target, offered and counter-offered books, as far as they still exist.
fn touched_books(conn: &Connection, request: &SwapRequest) -> rusqlite::Result<Vec<Book>> {
    let ids = [
        Some(request.book_id.as_str()),
        request.offered_book_id.as_deref(),
        request.counter_offered_book_id.as_deref(),
    ];
    let mut found = Vec::new();
    for id in ids.into_iter().flatten() {
        if let Some(book) = books::get_book(conn, id)? {
            found.push(book);
        }
    }
    Ok(found)
}

fn payload_for(request: &SwapRequest, books: &[Book], actor_name: &str) -> NotificationPayload {
    let title = |id: Option<&str>| {
        id.and_then(|id| books.iter().find(|b| b.id == id))
            .map(|b| b.title.clone())
    };
    NotificationPayload {
        requested_book_title: title(Some(&request.book_id)),
        offered_book_title: title(request.exchanged_book()),
        actor_display_name: actor_name.to_string(),
    }
}

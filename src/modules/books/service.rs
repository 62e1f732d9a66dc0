use rusqlite::TransactionBehavior;
use shelfswap_db::Database;
use time::OffsetDateTime;
use uuid::Uuid;

use super::models::{Book, BookPatch, NewBook};
use super::repo;
use crate::error::{ServiceError, ServiceResult};

/// Authoritative owner of book records and their availability flag.
#[derive(Debug, Clone)]
pub struct BookRegistry {
    db: Database,
}

impl BookRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// List a new book. New listings start out available.
    pub async fn create_book(&self, owner_id: &str, draft: NewBook) -> ServiceResult<Book> {
        let draft = draft.validate()?;
        let now = OffsetDateTime::now_utc();
        let book = Book {
            id: Uuid::now_v7().to_string(),
            owner_id: owner_id.to_string(),
            title: draft.title,
            authors: draft.authors,
            condition: draft.condition,
            description: draft.description,
            is_available: true,
            created_at: now,
            updated_at: now,
        };

        let stored = book.clone();
        self.db
            .call(move |conn| repo::insert_book(conn, &stored).map_err(ServiceError::from))
            .await?;

        tracing::info!(book_id = %book.id, owner = %book.owner_id, "book listed");
        Ok(book)
    }

    pub async fn get_book(&self, book_id: &str) -> ServiceResult<Book> {
        let id = book_id.to_string();
        self.db
            .call(move |conn| {
                repo::get_book(conn, &id)?.ok_or_else(|| ServiceError::not_found("book", id))
            })
            .await
    }

    pub async fn list_owned(&self, owner_id: &str) -> ServiceResult<Vec<Book>> {
        let owner = owner_id.to_string();
        self.db
            .call(move |conn| repo::list_owned(conn, &owner).map_err(ServiceError::from))
            .await
    }

    /// Edit descriptive fields. Owner only.
    pub async fn update_book(
        &self,
        book_id: &str,
        actor: &str,
        patch: BookPatch,
    ) -> ServiceResult<Book> {
        let id = book_id.to_string();
        let actor = actor.to_string();
        self.db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut book = load_owned(&tx, &id, &actor, "edit")?;
                patch.apply(&mut book)?;
                book.updated_at = OffsetDateTime::now_utc();
                repo::update_details(&tx, &book)?;
                tx.commit()?;
                Ok(book)
            })
            .await
    }

    /// Remove a listing. Refused while any live swap request refers to it.
    pub async fn delete_book(&self, book_id: &str, actor: &str) -> ServiceResult<()> {
        let id = book_id.to_string();
        let actor_id = actor.to_string();
        self.db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                load_owned(&tx, &id, &actor_id, "delete")?;
                if repo::is_referenced(&tx, &id)? {
                    return Err(ServiceError::conflict(
                        "book is part of an open swap request",
                    ));
                }
                repo::delete_book(&tx, &id)?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        tracing::info!(book_id, actor, "book deleted");
        Ok(())
    }

    /// Owner's manual availability toggle. Books held by a live swap
    /// request belong to the swap engine until the request lets go.
    pub async fn set_availability(
        &self,
        book_id: &str,
        is_available: bool,
        requesting_user_id: &str,
    ) -> ServiceResult<Book> {
        let id = book_id.to_string();
        let actor = requesting_user_id.to_string();
        let book = self
            .db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut book = load_owned(&tx, &id, &actor, "change availability of")?;
                if repo::is_held(&tx, &id)? {
                    return Err(ServiceError::conflict(
                        "book is held by an open swap request",
                    ));
                }
                let now = OffsetDateTime::now_utc();
                repo::set_available(&tx, &id, is_available, now)?;
                tx.commit()?;
                book.is_available = is_available;
                book.updated_at = now;
                Ok(book)
            })
            .await?;

        tracing::info!(book_id, is_available, "book availability changed by owner");
        Ok(book)
    }

    /// The user's books that can go into a new offer or counter-offer.
    pub async fn list_available_for_offering(&self, user_id: &str) -> ServiceResult<Vec<Book>> {
        let user = user_id.to_string();
        self.db
            .call(move |conn| repo::list_available_for_offering(conn, &user).map_err(ServiceError::from))
            .await
    }

    /// Other people's books that are on offer and not already in play.
    ///
    /// Stricter than [`Self::list_available_for_offering`]: a book named in
    /// any role by a live request stays hidden, even once a counter-offer
    /// has released it back to its owner.
    pub async fn list_discoverable(&self, excluding_user_id: &str) -> ServiceResult<Vec<Book>> {
        let user = excluding_user_id.to_string();
        self.db
            .call(move |conn| repo::list_discoverable(conn, &user).map_err(ServiceError::from))
            .await
    }
}

fn load_owned(
    conn: &rusqlite::Connection,
    id: &str,
    actor: &str,
    action: &str,
) -> ServiceResult<Book> {
    let book = repo::get_book(conn, id)?.ok_or_else(|| ServiceError::not_found("book", id))?;
    shelfswap_authz::require_owner(actor, &book.owner_id)
        .map_err(|_| ServiceError::forbidden(format!("only the owner may {action} this book")))?;
    Ok(book)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::books::models::BookCondition;
    use crate::test_support::{book_draft, TestEnv};

    #[tokio::test]
    async fn create_and_fetch() {
        let env = TestEnv::new().await;
        let book = env.books.create_book("alice", book_draft("Dune")).await.unwrap();

        assert!(book.is_available);
        assert_eq!(env.books.get_book(&book.id).await.unwrap(), book);
        assert_eq!(env.books.list_owned("alice").await.unwrap().len(), 1);
        assert!(matches!(
            env.books.get_book("missing").await,
            Err(ServiceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn only_the_owner_edits() {
        let env = TestEnv::new().await;
        let book = env.books.create_book("alice", book_draft("Dune")).await.unwrap();

        let patch = BookPatch {
            condition: Some(BookCondition::Poor),
            ..Default::default()
        };
        assert!(matches!(
            env.books.update_book(&book.id, "bob", patch.clone()).await,
            Err(ServiceError::Forbidden { .. })
        ));

        let updated = env.books.update_book(&book.id, "alice", patch).await.unwrap();
        assert_eq!(updated.condition, BookCondition::Poor);
        assert_eq!(updated.title, "Dune");
    }

    #[tokio::test]
    async fn availability_toggle_rules() {
        let env = TestEnv::new().await;
        let target = env.books.create_book("alice", book_draft("Emma")).await.unwrap();
        let offered = env.books.create_book("bob", book_draft("Ulysses")).await.unwrap();

        assert!(matches!(
            env.books.set_availability(&offered.id, false, "alice").await,
            Err(ServiceError::Forbidden { .. })
        ));

        env.swaps
            .create_swap_request("bob", &target.id, Some(&offered.id), None)
            .await
            .unwrap();

        // held by the request: the engine owns the flag now
        assert!(matches!(
            env.books.set_availability(&offered.id, true, "bob").await,
            Err(ServiceError::Conflict { .. })
        ));

        // the target is not held, its owner keeps control
        let toggled = env.books.set_availability(&target.id, false, "alice").await.unwrap();
        assert!(!toggled.is_available);
    }

    #[tokio::test]
    async fn offering_and_discovery_exclude_books_in_play() {
        let env = TestEnv::new().await;
        let target = env.books.create_book("alice", book_draft("Emma")).await.unwrap();
        let other = env.books.create_book("alice", book_draft("Persuasion")).await.unwrap();
        let offered = env.books.create_book("bob", book_draft("Ulysses")).await.unwrap();
        let spare = env.books.create_book("bob", book_draft("Dubliners")).await.unwrap();

        env.swaps
            .create_swap_request("bob", &target.id, Some(&offered.id), None)
            .await
            .unwrap();

        let offerable: Vec<String> = env
            .books
            .list_available_for_offering("bob")
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(offerable, vec![spare.id.clone()]);

        let discoverable_by_carol: Vec<String> = env
            .books
            .list_discoverable("carol")
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert!(discoverable_by_carol.contains(&other.id));
        assert!(discoverable_by_carol.contains(&spare.id));
        assert!(!discoverable_by_carol.contains(&target.id));
        assert!(!discoverable_by_carol.contains(&offered.id));

        let discoverable_by_bob = env.books.list_discoverable("bob").await.unwrap();
        assert!(discoverable_by_bob.iter().all(|b| b.owner_id != "bob"));
    }

    #[tokio::test]
    async fn countered_offer_is_offerable_but_not_discoverable() {
        let env = TestEnv::new().await;
        let target = env.books.create_book("alice", book_draft("Emma")).await.unwrap();
        let counter = env.books.create_book("alice", book_draft("Persuasion")).await.unwrap();
        let offered = env.books.create_book("bob", book_draft("Ulysses")).await.unwrap();

        let request = env
            .swaps
            .create_swap_request("bob", &target.id, Some(&offered.id), None)
            .await
            .unwrap();
        env.swaps
            .create_counter_offer(&request.id, "alice", &counter.id, None)
            .await
            .unwrap();

        // released by the counter-offer: back under its owner's control
        let offerable = env.books.list_available_for_offering("bob").await.unwrap();
        assert!(offerable.iter().any(|b| b.id == offered.id));
        let toggled = env.books.set_availability(&offered.id, false, "bob").await.unwrap();
        assert!(!toggled.is_available);
        env.books.set_availability(&offered.id, true, "bob").await.unwrap();

        // still named by a live request, so strangers do not see it
        let discoverable = env.books.list_discoverable("carol").await.unwrap();
        assert!(!discoverable.iter().any(|b| b.id == offered.id));
        assert!(!discoverable.iter().any(|b| b.id == counter.id));
    }

    #[tokio::test]
    async fn referenced_books_cannot_be_deleted() {
        let env = TestEnv::new().await;
        let target = env.books.create_book("alice", book_draft("Emma")).await.unwrap();
        let request = env
            .swaps
            .create_swap_request("bob", &target.id, None, None)
            .await
            .unwrap();

        assert!(matches!(
            env.books.delete_book(&target.id, "alice").await,
            Err(ServiceError::Conflict { .. })
        ));

        env.swaps.cancel_swap_request(&request.id, "bob").await.unwrap();
        env.books.delete_book(&target.id, "alice").await.unwrap();
        assert!(env.books.list_owned("alice").await.unwrap().is_empty());
    }
}

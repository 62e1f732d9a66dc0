use shelfswap_db::Database;

use super::models::Notification;
use super::repo;
use crate::error::{ServiceError, ServiceResult};

/// Recipient-side operations on stored notifications. Notifications of
/// other users read as not found.
#[derive(Debug, Clone)]
pub struct NotificationService {
    db: Database,
}

impl NotificationService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn list_notifications(
        &self,
        user_id: &str,
        unread_only: bool,
    ) -> ServiceResult<Vec<Notification>> {
        let user = user_id.to_string();
        self.db
            .call(move |conn| repo::list(conn, &user, unread_only).map_err(ServiceError::from))
            .await
    }

    pub async fn mark_read(&self, notification_id: &str, user_id: &str) -> ServiceResult<Notification> {
        let id = notification_id.to_string();
        let user = user_id.to_string();
        self.db
            .call(move |conn| {
                if !repo::mark_read(conn, &id, &user)? {
                    return Err(ServiceError::not_found("notification", id));
                }
                repo::get(conn, &id)?.ok_or_else(|| ServiceError::not_found("notification", id))
            })
            .await
    }

    pub async fn mark_all_read(&self, user_id: &str) -> ServiceResult<u64> {
        let user = user_id.to_string();
        let updated = self
            .db
            .call(move |conn| repo::mark_all_read(conn, &user).map_err(ServiceError::from))
            .await?;
        Ok(updated as u64)
    }

    pub async fn delete_notification(&self, notification_id: &str, user_id: &str) -> ServiceResult<()> {
        let id = notification_id.to_string();
        let user = user_id.to_string();
        self.db
            .call(move |conn| {
                if repo::delete(conn, &id, &user)? {
                    Ok(())
                } else {
                    Err(ServiceError::not_found("notification", id))
                }
            })
            .await
    }

    pub async fn unread_count(&self, user_id: &str) -> ServiceResult<u64> {
        let user = user_id.to_string();
        self.db
            .call(move |conn| repo::unread_count(conn, &user).map_err(ServiceError::from))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::swaps::state::Transition;
    use crate::test_support::{book_draft, TestEnv};

    #[tokio::test]
    async fn transitions_leave_notifications_for_the_other_party() {
        let env = TestEnv::new().await;
        let target = env.books.create_book("alice", book_draft("Emma")).await.unwrap();
        let request = env
            .swaps
            .create_swap_request("bob", &target.id, None, None)
            .await
            .unwrap();
        env.swaps.accept_swap_request(&request.id, "alice").await.unwrap();

        let alice = env.notifications.list_notifications("alice", false).await.unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].kind, Transition::Created);
        assert_eq!(alice[0].payload.requested_book_title.as_deref(), Some("Emma"));
        assert_eq!(alice[0].payload.actor_display_name, "bob");

        let bob = env.notifications.list_notifications("bob", false).await.unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].kind, Transition::Accepted);
        assert_eq!(bob[0].request_id, request.id);
    }

    #[tokio::test]
    async fn recipient_operations() {
        let env = TestEnv::new().await;
        let first = env.books.create_book("alice", book_draft("Emma")).await.unwrap();
        let second = env.books.create_book("alice", book_draft("Persuasion")).await.unwrap();
        env.swaps.create_swap_request("bob", &first.id, None, None).await.unwrap();
        env.swaps.create_swap_request("carol", &second.id, None, None).await.unwrap();

        assert_eq!(env.notifications.unread_count("alice").await.unwrap(), 2);
        let listed = env.notifications.list_notifications("alice", true).await.unwrap();

        // someone else's notification is invisible
        assert!(matches!(
            env.notifications.mark_read(&listed[0].id, "bob").await,
            Err(ServiceError::NotFound { .. })
        ));

        let read = env.notifications.mark_read(&listed[0].id, "alice").await.unwrap();
        assert!(read.is_read);
        assert_eq!(env.notifications.unread_count("alice").await.unwrap(), 1);
        assert_eq!(env.notifications.list_notifications("alice", true).await.unwrap().len(), 1);

        assert_eq!(env.notifications.mark_all_read("alice").await.unwrap(), 1);
        assert_eq!(env.notifications.unread_count("alice").await.unwrap(), 0);

        env.notifications.delete_notification(&listed[1].id, "alice").await.unwrap();
        assert!(matches!(
            env.notifications.delete_notification(&listed[1].id, "alice").await,
            Err(ServiceError::NotFound { .. })
        ));
        assert_eq!(env.notifications.list_notifications("alice", false).await.unwrap().len(), 1);
    }
}

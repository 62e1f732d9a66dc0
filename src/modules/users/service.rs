use shelfswap_db::Database;
use time::OffsetDateTime;

use super::models::{Profile, ProfileSummary, ProfileUpdate};
use super::repo;
use crate::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone)]
pub struct ProfileService {
    db: Database,
}

impl ProfileService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get_profile(&self, user_id: &str) -> ServiceResult<Profile> {
        let id = user_id.to_string();
        self.db
            .call(move |conn| {
                repo::get_profile(conn, &id)?.ok_or_else(|| ServiceError::not_found("profile", id))
            })
            .await
    }

    /// Create or edit the caller's own profile.
    pub async fn upsert_profile(&self, user_id: &str, update: ProfileUpdate) -> ServiceResult<Profile> {
        let update = update.validate()?;
        let id = user_id.to_string();
        let profile = self
            .db
            .call(move |conn| {
                repo::upsert_profile(conn, &id, &update, OffsetDateTime::now_utc())
                    .map_err(|e| ServiceError::from_write(e, "username is already taken"))
            })
            .await?;

        tracing::info!(user_id, username = %profile.username, "profile saved");
        Ok(profile)
    }

    pub async fn summary(&self, user_id: &str) -> ServiceResult<ProfileSummary> {
        let id = user_id.to_string();
        self.db
            .call(move |conn| repo::summary(conn, &id).map_err(ServiceError::from))
            .await
    }
}

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ServiceError, ServiceResult};

const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=32;
const MAX_DISPLAY_NAME_LEN: usize = 80;

/// Public profile of an identity-provider user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Body of `PUT /api/users/me`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl ProfileUpdate {
    pub fn validate(self) -> ServiceResult<Self> {
        let username = self.username.trim().to_string();
        if !USERNAME_LEN.contains(&username.chars().count()) {
            return Err(ServiceError::validation(
                "username",
                "username must be between 3 and 32 characters",
            ));
        }
        if !username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ServiceError::validation(
                "username",
                "username may only contain letters, digits, '_' and '-'",
            ));
        }

        let display_name = self
            .display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        if let Some(name) = &display_name {
            if name.chars().count() > MAX_DISPLAY_NAME_LEN {
                return Err(ServiceError::validation(
                    "display_name",
                    format!("display name must be at most {MAX_DISPLAY_NAME_LEN} characters"),
                ));
            }
        }

        Ok(Self {
            username,
            display_name,
        })
    }
}

/// The slice of a profile embedded in swap views and notification payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub id: String,
    pub username: Option<String>,
    /// Display name, else username, else the raw user id
    pub display_name: String,
}

impl ProfileSummary {
    /// Summary for a user who never saved a profile.
    pub fn anonymous(user_id: &str) -> Self {
        Self {
            id: user_id.to_string(),
            username: None,
            display_name: user_id.to_string(),
        }
    }
}

impl From<&Profile> for ProfileSummary {
    fn from(profile: &Profile) -> Self {
        Self {
            id: profile.id.clone(),
            username: Some(profile.username.clone()),
            display_name: profile
                .display_name
                .clone()
                .unwrap_or_else(|| profile.username.clone()),
        }
    }
}

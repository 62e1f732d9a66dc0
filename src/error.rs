//! Domain error taxonomy shared by the books, swaps and notifications
//! services, and its mapping onto HTTP responses.

use serde_json::json;
use shelfswap_authz::Denied;
use shelfswap_db::DatabaseError;
use shelfswap_http::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The referenced request, book or notification does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The actor lacks the role the action needs. `is_party` is false when
    /// the actor has no relation to the resource at all; those callers must
    /// not learn that it exists.
    #[error("forbidden: {message}")]
    Forbidden { message: String, is_party: bool },

    /// The action is not legal from the resource's current state.
    #[error("invalid state: {message}")]
    InvalidState { message: String },

    /// A referenced book is unavailable, or a concurrent writer won.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Malformed input.
    #[error("validation failed: {message}")]
    Validation { field: &'static str, message: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
            is_party: true,
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Translate a write failure: lost races become `Conflict`, everything
    /// else stays a database error.
    pub fn from_write(err: rusqlite::Error, message: &str) -> Self {
        if shelfswap_db::is_contention(&err) {
            tracing::debug!(error = %err, "write lost to a concurrent writer");
            Self::conflict(message)
        } else {
            Self::Database(err.into())
        }
    }
}

impl From<rusqlite::Error> for ServiceError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.into())
    }
}

impl From<Denied> for ServiceError {
    fn from(denied: Denied) -> Self {
        match denied {
            Denied::NotAParty => Self::Forbidden {
                message: denied.to_string(),
                is_party: false,
            },
            Denied::MissingCapability { .. } => Self::forbidden(denied.to_string()),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound { entity, .. } => AppError::not_found(format!("{entity} not found")),
            ServiceError::Forbidden {
                is_party: false, ..
            } => AppError::not_found("resource not found"),
            ServiceError::Forbidden { message, .. } => AppError::forbidden(message),
            ServiceError::InvalidState { message } => AppError::invalid_state(vec![], message),
            ServiceError::Conflict { message } => AppError::conflict(
                vec![json!({"hint": "the resource changed, refresh and try again"})],
                message,
            ),
            ServiceError::Validation { field, message } => {
                AppError::validation(vec![json!({"field": field, "error": message})], message)
            }
            ServiceError::Database(e) => AppError::Internal(anyhow::Error::new(e)),
        }
    }
}

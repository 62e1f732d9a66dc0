//! Caller identity.
//!
//! Sessions are issued by the identity provider; the gateway in front of
//! this service verifies them and forwards the user id in a header. This
//! module only reads that header.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;

/// Header carrying the authenticated user id
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated user id extracted from [`USER_ID_HEADER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser(pub String);

impl CurrentUser {
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::unauthorized("missing authenticated user"))?;

        let user_id = value
            .to_str()
            .map_err(|_| AppError::unauthorized("malformed user id header"))?
            .trim();

        if user_id.is_empty() {
            return Err(AppError::unauthorized("missing authenticated user"));
        }

        Ok(CurrentUser(user_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};
    use axum::response::IntoResponse;

    async fn extract(request: Request<()>) -> Result<CurrentUser, AppError> {
        let (mut parts, _) = request.into_parts();
        CurrentUser::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_user_from_header() {
        let request = Request::builder()
            .header(USER_ID_HEADER, " user-1 ")
            .body(())
            .unwrap();
        assert_eq!(extract(request).await.unwrap().id(), "user-1");
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let request = Request::builder().body(()).unwrap();
        let err = extract(request).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }
}

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::get,
    Json, Router,
};
use shelfswap_http::{AppError, CurrentUser};

use super::models::{Profile, ProfileSummary, ProfileUpdate};
use super::service::ProfileService;

/// Routes mounted under `/api/users`.
pub fn router(service: ProfileService) -> Router {
    Router::new()
        .route("/me", get(my_profile).put(update_my_profile))
        .route("/{id}", get(profile_summary))
        .with_state(service)
}

async fn my_profile(
    State(service): State<ProfileService>,
    user: CurrentUser,
) -> Result<Json<Profile>, AppError> {
    Ok(Json(service.get_profile(user.id()).await?))
}

async fn update_my_profile(
    State(service): State<ProfileService>,
    user: CurrentUser,
    payload: Result<Json<ProfileUpdate>, JsonRejection>,
) -> Result<Json<Profile>, AppError> {
    let Json(update) = payload?;
    Ok(Json(service.upsert_profile(user.id(), update).await?))
}

/// Anyone signed in may look up another user's public summary.
async fn profile_summary(
    State(service): State<ProfileService>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ProfileSummary>, AppError> {
    Ok(Json(service.summary(&id).await?))
}

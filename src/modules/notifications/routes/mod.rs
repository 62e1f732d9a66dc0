use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use shelfswap_http::{AppError, CurrentUser};

use super::models::{ListQuery, MarkedRead, Notification, UnreadCount};
use super::service::NotificationService;

/// Routes mounted under `/api/notifications`.
pub fn router(service: NotificationService) -> Router {
    Router::new()
        .route("/", get(list_notifications))
        .route("/unread-count", get(unread_count))
        .route("/read-all", post(mark_all_read))
        .route("/{id}/read", post(mark_read))
        .route("/{id}", delete(delete_notification))
        .with_state(service)
}

async fn list_notifications(
    State(service): State<NotificationService>,
    user: CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Notification>>, AppError> {
    Ok(Json(
        service
            .list_notifications(user.id(), query.unread_only)
            .await?,
    ))
}

async fn unread_count(
    State(service): State<NotificationService>,
    user: CurrentUser,
) -> Result<Json<UnreadCount>, AppError> {
    let unread = service.unread_count(user.id()).await?;
    Ok(Json(UnreadCount { unread }))
}

async fn mark_all_read(
    State(service): State<NotificationService>,
    user: CurrentUser,
) -> Result<Json<MarkedRead>, AppError> {
    let updated = service.mark_all_read(user.id()).await?;
    Ok(Json(MarkedRead { updated }))
}

async fn mark_read(
    State(service): State<NotificationService>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Notification>, AppError> {
    Ok(Json(service.mark_read(&id, user.id()).await?))
}

async fn delete_notification(
    State(service): State<NotificationService>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    service.delete_notification(&id, user.id()).await?;
    Ok(StatusCode::NO_CONTENT)
}

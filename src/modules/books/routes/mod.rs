use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use shelfswap_http::{AppError, CurrentUser};

use super::models::{AvailabilityUpdate, Book, BookPatch, NewBook};
use super::service::BookRegistry;

/// Routes mounted under `/api/books`.
pub fn router(registry: BookRegistry) -> Router {
    Router::new()
        .route("/", get(discover).post(create_book))
        .route("/mine", get(my_books))
        .route("/offerable", get(offerable_books))
        .route("/{id}", get(get_book).patch(update_book).delete(delete_book))
        .route("/{id}/availability", put(set_availability))
        .with_state(registry)
}

/// Books on offer from everyone but the caller.
async fn discover(
    State(registry): State<BookRegistry>,
    user: CurrentUser,
) -> Result<Json<Vec<Book>>, AppError> {
    Ok(Json(registry.list_discoverable(user.id()).await?))
}

async fn create_book(
    State(registry): State<BookRegistry>,
    user: CurrentUser,
    payload: Result<Json<NewBook>, JsonRejection>,
) -> Result<(StatusCode, Json<Book>), AppError> {
    let Json(draft) = payload?;
    let book = registry.create_book(user.id(), draft).await?;
    Ok((StatusCode::CREATED, Json(book)))
}

async fn my_books(
    State(registry): State<BookRegistry>,
    user: CurrentUser,
) -> Result<Json<Vec<Book>>, AppError> {
    Ok(Json(registry.list_owned(user.id()).await?))
}

async fn offerable_books(
    State(registry): State<BookRegistry>,
    user: CurrentUser,
) -> Result<Json<Vec<Book>>, AppError> {
    Ok(Json(registry.list_available_for_offering(user.id()).await?))
}

async fn get_book(
    State(registry): State<BookRegistry>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Book>, AppError> {
    Ok(Json(registry.get_book(&id).await?))
}

async fn update_book(
    State(registry): State<BookRegistry>,
    user: CurrentUser,
    Path(id): Path<String>,
    payload: Result<Json<BookPatch>, JsonRejection>,
) -> Result<Json<Book>, AppError> {
    let Json(patch) = payload?;
    Ok(Json(registry.update_book(&id, user.id(), patch).await?))
}

async fn delete_book(
    State(registry): State<BookRegistry>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    registry.delete_book(&id, user.id()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_availability(
    State(registry): State<BookRegistry>,
    user: CurrentUser,
    Path(id): Path<String>,
    payload: Result<Json<AvailabilityUpdate>, JsonRejection>,
) -> Result<Json<Book>, AppError> {
    let Json(update) = payload?;
    Ok(Json(
        registry
            .set_availability(&id, update.is_available, user.id())
            .await?,
    ))
}

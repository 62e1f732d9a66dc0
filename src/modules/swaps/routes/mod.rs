use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use shelfswap_http::{AppError, CurrentUser};

use super::engine::SwapEngine;
use super::models::{
    CompleteBody, CounterOfferBody, CreateSwapRequest, SwapRequest, SwapRequestView, SwapStatistics,
    UserSwapRequests,
};
use super::state::SwapCommand;

/// Routes mounted under `/api/swaps`.
pub fn router(engine: SwapEngine) -> Router {
    Router::new()
        .route("/", get(my_requests).post(create_request))
        .route("/commands", post(run_command))
        .route("/stats", get(statistics))
        .route("/{id}", get(get_request))
        .route("/{id}/counter-offer", post(counter_offer))
        .route("/{id}/accept", post(accept))
        .route("/{id}/cancel", post(cancel))
        .route("/{id}/complete", post(complete))
        .with_state(engine)
}

async fn my_requests(
    State(engine): State<SwapEngine>,
    user: CurrentUser,
) -> Result<Json<UserSwapRequests>, AppError> {
    Ok(Json(engine.get_swap_requests_for_user(user.id()).await?))
}

async fn create_request(
    State(engine): State<SwapEngine>,
    user: CurrentUser,
    payload: Result<Json<CreateSwapRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SwapRequest>), AppError> {
    let Json(body) = payload?;
    let request = engine
        .create_swap_request(
            user.id(),
            &body.book_id,
            body.offered_book_id.as_deref(),
            body.message.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// Tagged command endpoint: `{"type": "accept", "request_id": "..."}`.
async fn run_command(
    State(engine): State<SwapEngine>,
    user: CurrentUser,
    payload: Result<Json<SwapCommand>, JsonRejection>,
) -> Result<Json<SwapRequest>, AppError> {
    let Json(command) = payload?;
    Ok(Json(engine.execute(user.id(), command).await?))
}

async fn statistics(
    State(engine): State<SwapEngine>,
    user: CurrentUser,
) -> Result<Json<SwapStatistics>, AppError> {
    Ok(Json(engine.get_swap_statistics(user.id()).await?))
}

async fn get_request(
    State(engine): State<SwapEngine>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<SwapRequestView>, AppError> {
    Ok(Json(engine.get_swap_request(&id, user.id()).await?))
}

async fn counter_offer(
    State(engine): State<SwapEngine>,
    user: CurrentUser,
    Path(id): Path<String>,
    payload: Result<Json<CounterOfferBody>, JsonRejection>,
) -> Result<Json<SwapRequest>, AppError> {
    let Json(body) = payload?;
    let request = engine
        .create_counter_offer(
            &id,
            user.id(),
            &body.counter_offered_book_id,
            body.message.as_deref(),
        )
        .await?;
    Ok(Json(request))
}

async fn accept(
    State(engine): State<SwapEngine>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<SwapRequest>, AppError> {
    Ok(Json(engine.accept_swap_request(&id, user.id()).await?))
}

async fn cancel(
    State(engine): State<SwapEngine>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<SwapRequest>, AppError> {
    Ok(Json(engine.cancel_swap_request(&id, user.id()).await?))
}

/// The body is optional; an empty POST confirms without a rating.
async fn complete(
    State(engine): State<SwapEngine>,
    user: CurrentUser,
    Path(id): Path<String>,
    payload: Option<Json<CompleteBody>>,
) -> Result<Json<SwapRequest>, AppError> {
    let body = payload.map(|Json(body)| body).unwrap_or_default();
    let request = engine
        .complete_swap_request(&id, user.id(), body.rating, body.feedback.as_deref())
        .await?;
    Ok(Json(request))
}

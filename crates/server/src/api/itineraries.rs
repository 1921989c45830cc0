//! # Itinerary Endpoints
//!
//! Public intake and polling surface.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use itinerary_core::pipeline::{Envelope, PipelineError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

use super::error::ApiError;
use super::SharedState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateItineraryRequest {
    pub user_id: String,
    /// Free-form trip requirements (destination, dates, interests, budget...)
    #[schema(value_type = Object)]
    pub requirements: Value,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/", post(create_itinerary))
        .route("/:id", get(get_itinerary))
        .route("/:id/result", get(get_itinerary_result))
}

fn to_data<T: serde::Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value)
        .map_err(|e| ApiError::Pipeline(PipelineError::Storage(anyhow::Error::new(e))))
}

/// Submit a new itinerary request; processing starts in the background
#[utoipa::path(
    post,
    path = "/api/v1/itineraries",
    tag = "itineraries",
    request_body = CreateItineraryRequest,
    responses(
        (status = 202, description = "Request accepted", body = super::ApiEnvelope),
        (status = 400, description = "Invalid request", body = super::ApiEnvelope)
    )
)]
pub async fn create_itinerary(
    State(state): State<SharedState>,
    body: Result<Json<CreateItineraryRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Envelope>), ApiError> {
    let Json(req) = body.map_err(|e| PipelineError::Validation(e.body_text()))?;
    let request = state.orchestrator.submit(&req.user_id, req.requirements)?;

    let request_id = request.id.clone();
    let background = Arc::clone(&state);
    tokio::spawn(async move {
        if let Err(e) = background.orchestrator.begin(&request_id).await {
            tracing::error!(request_id = %request_id, code = e.code(), "Pipeline did not start: {}", e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(Envelope::ok(json!({
            "requestId": request.id,
            "status": request.status,
        }))),
    ))
}

/// Current status and processing log of a request
#[utoipa::path(
    get,
    path = "/api/v1/itineraries/{id}",
    tag = "itineraries",
    params(("id" = String, Path, description = "Request id")),
    responses(
        (status = 200, description = "Request status", body = super::ApiEnvelope),
        (status = 404, description = "Unknown or expired request", body = super::ApiEnvelope)
    )
)]
pub async fn get_itinerary(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope>, ApiError> {
    let request = state.ctx.requests.require(&id)?;
    Ok(Json(Envelope::ok(to_data(&request)?)))
}

/// The archived itinerary of a completed request
#[utoipa::path(
    get,
    path = "/api/v1/itineraries/{id}/result",
    tag = "itineraries",
    params(("id" = String, Path, description = "Request id")),
    responses(
        (status = 200, description = "Final itinerary", body = super::ApiEnvelope),
        (status = 404, description = "Not completed (yet)", body = super::ApiEnvelope)
    )
)]
pub async fn get_itinerary_result(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope>, ApiError> {
    match state.archive.fetch(&id).await.map_err(PipelineError::Storage)? {
        Some(itinerary) => Ok(Json(Envelope::ok(to_data(&itinerary)?))),
        None => Err(ApiError::NotFound(format!(
            "no itinerary available for request {}",
            id
        ))),
    }
}

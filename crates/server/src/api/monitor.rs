//! # Monitor Endpoints
//!
//! Hooks for an external scheduler to drive the timeout monitor.

use axum::{
    extract::{Path, State},
    middleware,
    routing::post,
    Json, Router,
};
use itinerary_core::pipeline::Envelope;
use serde_json::json;

use super::agents::require_internal_secret;
use super::error::{method_not_allowed, ApiError};
use super::SharedState;

pub fn routes(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/timeouts", post(sweep_timeouts).fallback(method_not_allowed))
        .route("/timeouts/:id", post(check_timeout).fallback(method_not_allowed))
        .route_layer(middleware::from_fn_with_state(state, require_internal_secret))
}

/// Check every request with a pending timeout record
#[utoipa::path(
    post,
    path = "/api/v1/monitor/timeouts",
    tag = "monitor",
    params(("x-internal-secret" = String, Header, description = "Shared internal secret")),
    responses(
        (status = 200, description = "Sweep report", body = super::ApiEnvelope),
        (status = 401, description = "Missing or invalid internal secret", body = super::ApiEnvelope)
    )
)]
pub async fn sweep_timeouts(State(state): State<SharedState>) -> Result<Json<Envelope>, ApiError> {
    let report = state.monitor.sweep()?;
    Ok(Json(Envelope::ok(json!(report))))
}

/// Check one request against its processing budget
#[utoipa::path(
    post,
    path = "/api/v1/monitor/timeouts/{id}",
    tag = "monitor",
    params(
        ("id" = String, Path, description = "Request id"),
        ("x-internal-secret" = String, Header, description = "Shared internal secret")
    ),
    responses(
        (status = 200, description = "Check outcome", body = super::ApiEnvelope),
        (status = 401, description = "Missing or invalid internal secret", body = super::ApiEnvelope)
    )
)]
pub async fn check_timeout(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope>, ApiError> {
    let check = state.monitor.check(&id)?;
    Ok(Json(Envelope::ok(json!({
        "requestId": id,
        "check": check,
    }))))
}

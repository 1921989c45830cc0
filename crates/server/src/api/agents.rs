//! # Stage Endpoints
//!
//! `POST /api/v1/agents/{stage}`: internal, secret-protected entry point for
//! each pipeline stage. Handoffs between stages arrive here.

use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::post,
    Json, Router,
};
use itinerary_core::pipeline::{
    Envelope, PipelineError, Stage, StageInvocation, INTERNAL_SECRET_HEADER,
};

use super::error::{method_not_allowed, ApiError};
use super::SharedState;

pub fn routes(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/:stage", post(run_stage).fallback(method_not_allowed))
        .route_layer(middleware::from_fn_with_state(state, require_internal_secret))
}

/// Reject calls without the shared internal secret
pub async fn require_internal_secret(
    State(state): State<SharedState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = req
        .headers()
        .get(INTERNAL_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    state.auth.verify(presented)?;
    Ok(next.run(req).await)
}

/// Run one pipeline stage for a request
#[utoipa::path(
    post,
    path = "/api/v1/agents/{stage}",
    tag = "agents",
    params(
        ("stage" = String, Path, description = "research, curation, validation or response"),
        ("x-internal-secret" = String, Header, description = "Shared internal secret")
    ),
    request_body = super::StageInvocationBody,
    responses(
        (status = 200, description = "Stage completed or replayed", body = super::ApiEnvelope),
        (status = 400, description = "Malformed body or collaborator output", body = super::ApiEnvelope),
        (status = 401, description = "Missing or invalid internal secret", body = super::ApiEnvelope),
        (status = 404, description = "Unknown stage, request or upstream result", body = super::ApiEnvelope),
        (status = 409, description = "Stage not active or idempotency key mismatch", body = super::ApiEnvelope),
        (status = 502, description = "Collaborator or handoff failure", body = super::ApiEnvelope)
    )
)]
pub async fn run_stage(
    State(state): State<SharedState>,
    Path(stage): Path<String>,
    body: Result<Json<StageInvocation>, JsonRejection>,
) -> Result<Json<Envelope>, ApiError> {
    let stage = Stage::parse(&stage)
        .ok_or_else(|| ApiError::NotFound(format!("unknown stage '{}'", stage)))?;

    let Json(invocation) = body.map_err(|e| PipelineError::Validation(e.body_text()))?;
    if invocation.request_id.trim().is_empty() {
        return Err(PipelineError::Validation("requestId is required".to_string()).into());
    }

    let outcome = state.agents.get(stage).run(&invocation).await?;
    Ok(Json(Envelope::ok(outcome.to_data())))
}

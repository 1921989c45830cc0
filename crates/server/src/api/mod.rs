//! # HTTP API
//!
//! Axum surface over the pipeline:
//!
//! - `/api/v1/itineraries` - public intake and polling
//! - `/api/v1/agents/{stage}` - internal stage endpoints (secret-protected)
//! - `/api/v1/monitor/timeouts` - timeout checks for an external scheduler (secret-protected)
//! - `/api/v1/openapi.json`, `/health`

pub mod agents;
pub mod error;
pub mod itineraries;
pub mod monitor;

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use itinerary_core::config::PipelineConfig;
use itinerary_core::pipeline::{
    Collaborators, InternalAuth, Orchestrator, PipelineContext, StageAgents, StageTransport,
    TimeoutMonitor,
};
use itinerary_core::state::{ItineraryArchive, PipelineDb};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};

/// Application state
pub struct AppState {
    pub ctx: PipelineContext,
    pub agents: Arc<StageAgents>,
    pub orchestrator: Orchestrator,
    pub monitor: TimeoutMonitor,
    pub auth: InternalAuth,
    pub archive: Arc<dyn ItineraryArchive>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        db: &PipelineDb,
        config: PipelineConfig,
        transport: Arc<dyn StageTransport>,
        collaborators: Collaborators,
    ) -> Self {
        let auth = InternalAuth::new(config.internal_secret.clone());
        let archive = Arc::clone(&collaborators.archive);
        let ctx = PipelineContext::new(db, config, transport);

        Self {
            agents: Arc::new(StageAgents::new(&ctx, collaborators)),
            orchestrator: Orchestrator::new(ctx.clone()),
            monitor: TimeoutMonitor::new(ctx.clone()),
            ctx,
            auth,
            archive,
        }
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .nest("/api/v1/agents", agents::routes(state.clone()))
        .nest("/api/v1/monitor", monitor::routes(state.clone()))
        .nest("/api/v1/itineraries", itineraries::routes())
        .route("/api/v1/openapi.json", get(serve_openapi))
        .route("/health", get(health))
        .with_state(state)
}

// === OpenAPI Definition ===

/// Response envelope shared by every endpoint
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct ApiEnvelope {
    success: bool,
    #[schema(value_type = Option<Object>)]
    data: Option<Value>,
    error: Option<ApiErrorBody>,
}

#[derive(ToSchema)]
#[allow(dead_code)]
pub struct ApiErrorBody {
    /// Stable machine-readable code, e.g. `UPSTREAM_FAILURE`
    code: String,
    message: String,
    #[schema(value_type = Option<Object>)]
    details: Option<Value>,
}

/// Stage invocation body
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)]
pub struct StageInvocationBody {
    request_id: String,
    /// Invocation token handed over by the previous stage
    idempotency_key: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: String,
    version: String,
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Itinerary Pipeline API",
        version = "1.0.0",
        description = "Orchestration pipeline for itinerary generation"
    ),
    paths(
        itineraries::create_itinerary,
        itineraries::get_itinerary,
        itineraries::get_itinerary_result,
        agents::run_stage,
        monitor::sweep_timeouts,
        monitor::check_timeout,
        health
    ),
    components(
        schemas(
            ApiEnvelope,
            ApiErrorBody,
            StageInvocationBody,
            HealthResponse,
            itineraries::CreateItineraryRequest
        )
    ),
    tags(
        (name = "itineraries", description = "Itinerary intake and polling"),
        (name = "agents", description = "Internal stage endpoints"),
        (name = "monitor", description = "Processing timeout checks"),
        (name = "system", description = "Health and discovery")
    )
)]
pub struct ApiDoc;

async fn serve_openapi() -> Response {
    match ApiDoc::openapi().to_json() {
        Ok(spec) => ([(header::CONTENT_TYPE, "application/json")], Body::from(spec)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Liveness check
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses((status = 200, description = "Server is up", body = HealthResponse))
)]
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

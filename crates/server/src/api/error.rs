//! Error envelope and HTTP status mapping for every endpoint.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use itinerary_core::pipeline::{Envelope, ErrorBody, PipelineError};

#[derive(Debug)]
pub enum ApiError {
    Pipeline(PipelineError),
    /// A resource outside the pipeline's own records (unknown stage, unfinished itinerary)
    NotFound(String),
    MethodNotAllowed,
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError::Pipeline(err)
    }
}

pub fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
        PipelineError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        PipelineError::NotFound(_) | PipelineError::MissingUpstreamResult { .. } => {
            StatusCode::NOT_FOUND
        }
        PipelineError::Conflict(_) | PipelineError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        PipelineError::Upstream(_) | PipelineError::Handoff { .. } => StatusCode::BAD_GATEWAY,
        PipelineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        PipelineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, envelope) = match self {
            ApiError::Pipeline(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    tracing::warn!(code = err.code(), "Request failed: {}", err);
                }
                (status, Envelope::failure(&err))
            }
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                envelope_with("NOT_FOUND", message),
            ),
            ApiError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                envelope_with("METHOD_NOT_ALLOWED", "method not allowed".to_string()),
            ),
        };
        (status, Json(envelope)).into_response()
    }
}

fn envelope_with(code: &str, message: String) -> Envelope {
    Envelope {
        success: false,
        data: None,
        error: Some(ErrorBody {
            code: code.to_string(),
            message,
            details: None,
        }),
    }
}

/// Method fallback for routes that only accept POST
pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

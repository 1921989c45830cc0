//! # Pipeline Errors
//!
//! Typed failure taxonomy shared by the orchestrator, the stage agents and the
//! monitor. Every variant maps to a stable wire code that is recorded in
//! `ProcessingError.code` and returned in error envelopes.

use chrono::Utc;
use serde_json::json;
use thiserror::Error;

use super::stage::{PipelineEvent, RequestStatus, Stage};
use crate::state::ProcessingError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("itinerary request not found: {0}")]
    NotFound(String),

    #[error("{stage} result for request {request_id} is missing")]
    MissingUpstreamResult { stage: Stage, request_id: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid collaborator output: {0}")]
    Validation(String),

    /// Message is kept verbatim so callers see exactly what the collaborator reported
    #[error("{0}")]
    Upstream(String),

    #[error("processing exceeded its {budget_ms}ms budget ({elapsed_ms}ms elapsed)")]
    Timeout { elapsed_ms: i64, budget_ms: u64 },

    #[error("handoff to {stage} failed: {message}")]
    Handoff { stage: Stage, message: String },

    #[error("concurrent update rejected: {0}")]
    Conflict(String),

    #[error("cannot apply {event:?} while request is {from}")]
    InvalidTransition {
        from: RequestStatus,
        event: PipelineEvent,
    },

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl PipelineError {
    /// Wrap a collaborator failure
    pub fn upstream(err: anyhow::Error) -> Self {
        Self::Upstream(format!("{err:#}"))
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::MissingUpstreamResult { .. } => "MISSING_UPSTREAM_RESULT",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Upstream(_) => "UPSTREAM_FAILURE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Handoff { .. } => "HANDOFF_FAILED",
            Self::Conflict(_) => "CONFLICT",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Storage(_) => "INTERNAL_ERROR",
        }
    }

    /// Structured details for the error envelope
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::MissingUpstreamResult { stage, request_id } => Some(json!({
                "upstreamStage": stage,
                "requestId": request_id,
            })),
            Self::Timeout {
                elapsed_ms,
                budget_ms,
            } => Some(json!({
                "elapsedMs": elapsed_ms,
                "maxDurationMs": budget_ms,
            })),
            Self::Handoff { stage, .. } => Some(json!({ "targetStage": stage })),
            Self::InvalidTransition { from, event } => Some(json!({
                "status": from,
                "event": event,
            })),
            _ => None,
        }
    }

    /// Build the record attached to the request and to the failing log entry
    pub fn to_processing_error(&self) -> ProcessingError {
        ProcessingError {
            code: self.code().to_string(),
            message: self.to_string(),
            details: self.details(),
            timestamp: Utc::now(),
        }
    }
}

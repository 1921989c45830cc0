//! # Stage Wire Protocol
//!
//! Request and response bodies shared by the stage endpoints, the HTTP
//! transport and the in-process dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::PipelineError;
use super::stage::Stage;

/// Body of a stage invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StageInvocation {
    pub request_id: String,
    /// Invocation token of the running log entry this call is meant to drive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl StageInvocation {
    pub fn new(request_id: impl Into<String>, idempotency_key: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            idempotency_key: Some(idempotency_key.into()),
        }
    }

    /// Invocation without a token (manual or legacy callers)
    pub fn unkeyed(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            idempotency_key: None,
        }
    }
}

/// What a successful stage run reports back
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub request_id: String,
    pub stage: Stage,
    pub summary: Map<String, Value>,
    pub processing_time_ms: u64,
    /// The stage had already completed; nothing was mutated
    pub replayed: bool,
    /// The stage handed off to, `None` when the pipeline finished or on replay
    pub next: Option<Stage>,
}

impl StageOutcome {
    /// `data` payload of the success envelope
    pub fn to_data(&self) -> Value {
        let mut data = Map::new();
        data.insert("requestId".to_string(), Value::from(self.request_id.clone()));
        data.insert(
            "status".to_string(),
            Value::from(self.stage.completed().as_str()),
        );
        for (key, value) in &self.summary {
            data.insert(key.clone(), value.clone());
        }
        data.insert(
            "processingTime".to_string(),
            Value::from(self.processing_time_ms),
        );
        if self.replayed {
            data.insert("replayed".to_string(), Value::Bool(true));
        }
        Value::Object(data)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<&PipelineError> for ErrorBody {
    fn from(err: &PipelineError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            details: err.details(),
        }
    }
}

/// `{success, data}` or `{success, error}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Envelope {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(err: &PipelineError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody::from(err)),
        }
    }
}

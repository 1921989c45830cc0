//! # Orchestrator
//!
//! Creates requests and starts their pipeline at the research stage.

use serde_json::Value;

use super::context::PipelineContext;
use super::error::PipelineError;
use super::stage::{PipelineEvent, Stage};
use super::wire::StageInvocation;
use crate::state::{new_invocation_id, ItineraryRequest};

pub struct Orchestrator {
    ctx: PipelineContext,
}

impl Orchestrator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    /// Persist a new request in `initiated`
    pub fn submit(
        &self,
        user_id: &str,
        requirements: Value,
    ) -> Result<ItineraryRequest, PipelineError> {
        if user_id.trim().is_empty() {
            return Err(PipelineError::Validation("userId is required".to_string()));
        }
        if !requirements.is_object() {
            return Err(PipelineError::Validation(
                "requirements must be a JSON object".to_string(),
            ));
        }

        let mut request = ItineraryRequest::new(user_id, requirements);
        self.ctx.requests.create(&mut request)?;
        tracing::info!(request_id = %request.id, user_id, "Itinerary request created");
        Ok(request)
    }

    /// Start the pipeline for an `initiated` request
    ///
    /// Nothing is mutated when the request is missing or already started. Once
    /// the research entry is persisted, a failure to arm the timeout or to
    /// reach the research stage fails the request.
    #[tracing::instrument(skip(self))]
    pub async fn begin(&self, request_id: &str) -> Result<ItineraryRequest, PipelineError> {
        let mut request = self.ctx.requests.require(request_id)?;
        request.apply(PipelineEvent::Begin)?;

        let token = new_invocation_id();
        request.start_stage(Stage::Research, token.clone());
        self.ctx.requests.save(&mut request)?;

        if let Err(err) = self.launch(request_id, token).await {
            if let Err(fail_err) = self.ctx.failures.fail(request_id, Stage::Research, &err) {
                tracing::error!("Could not record failure ({}): {}", err, fail_err);
            }
            return Err(err);
        }

        tracing::info!("Pipeline started");
        Ok(request)
    }

    async fn launch(&self, request_id: &str, token: String) -> Result<(), PipelineError> {
        self.ctx
            .timeouts
            .start(request_id, self.ctx.config.timeout_budget_ms)?;
        self.ctx
            .transport
            .dispatch(Stage::Research, StageInvocation::new(request_id, token))
            .await
    }
}

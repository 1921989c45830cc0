//! # Failure Handler
//!
//! The single place a request is moved to `failed`. Stage agents, the
//! orchestrator and the timeout monitor all route here.

use std::sync::Arc;

use super::error::PipelineError;
use super::stage::{PipelineEvent, Stage};
use crate::state::RequestStore;

/// Reload-and-reapply attempts when a concurrent writer wins the CAS
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// The request is now failed
    Recorded,
    /// The request expired or never existed; only logged
    RequestMissing,
    /// The request was already completed or failed; left untouched
    AlreadyTerminal,
}

pub struct FailureHandler {
    requests: Arc<RequestStore>,
}

impl FailureHandler {
    pub fn new(requests: Arc<RequestStore>) -> Self {
        Self { requests }
    }

    /// Record `error` against `agent`'s running entry and fail the request
    #[tracing::instrument(skip(self, error), fields(code = error.code()))]
    pub fn fail(
        &self,
        request_id: &str,
        agent: Stage,
        error: &PipelineError,
    ) -> Result<FailureDisposition, PipelineError> {
        self.record(request_id, agent, error, |_| {})
    }

    /// `before_save` runs once per attempt, between load and save
    fn record(
        &self,
        request_id: &str,
        agent: Stage,
        error: &PipelineError,
        mut before_save: impl FnMut(u32),
    ) -> Result<FailureDisposition, PipelineError> {
        let event = match error {
            PipelineError::Timeout { .. } => PipelineEvent::TimedOut,
            _ => PipelineEvent::StageFailed(agent),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;

            let Some(mut request) = self.requests.load(request_id)? else {
                tracing::warn!("Failure for unknown request: {}", error);
                return Ok(FailureDisposition::RequestMissing);
            };

            if request.status.is_terminal() {
                tracing::info!(
                    status = %request.status,
                    "Request already terminal, failure not recorded: {}",
                    error
                );
                return Ok(FailureDisposition::AlreadyTerminal);
            }

            let record = error.to_processing_error();
            if !request.fail_stage(agent, &record) {
                tracing::debug!("No running {} entry to mark failed", agent);
            }
            request.apply(event)?;
            request.error_details = Some(record);

            before_save(attempt);
            match self.requests.save(&mut request) {
                Ok(()) => {
                    tracing::error!("Pipeline failed: {}", error);
                    return Ok(FailureDisposition::Recorded);
                }
                Err(PipelineError::Conflict(reason)) if attempt < MAX_ATTEMPTS => {
                    tracing::debug!(attempt, "Retrying failure write: {}", reason);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

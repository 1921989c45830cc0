//! # Stage Agent
//!
//! Runs one stage for one request: precondition checks, delegated work,
//! the completion write and the handoff to the next stage.
//!
//! ## Completion Protocol
//!
//! ```text
//! require request ─▶ replay? ─▶ upstream cached? ─▶ running entry + key match?
//!        (any failure above: error returned, nothing mutated)
//!                               │
//!                               ▼
//!   worker.execute ─▶ complete entry, advance status, append next
//!   running entry ─▶ save (CAS) ─▶ cache result ─▶ dispatch next | finalize
//!        (any failure here: routed to the FailureHandler)
//! ```

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;

use super::context::PipelineContext;
use super::error::PipelineError;
use super::stage::{PipelineEvent, Stage};
use super::wire::{StageInvocation, StageOutcome};
use crate::skills::{
    ContentGenerator, CurationSkill, PlaceVerifier, ResearchSkill, ResponseSkill, ValidationSkill,
};
use crate::state::{
    new_invocation_id, ItineraryArchive, ItineraryRequest, LogStatus, StageResultCache,
};

/// What a stage's work produced
#[derive(Debug, Clone)]
pub struct StageOutput {
    /// Typed stage result, stored under `{stage}_results:{id}`
    pub result: Value,
    /// Recorded on the log entry and returned in the success envelope
    pub summary: Map<String, Value>,
}

impl StageOutput {
    pub fn new<T: Serialize>(result: &T, summary: Value) -> Result<Self, PipelineError> {
        let result = serde_json::to_value(result)
            .map_err(|e| PipelineError::Storage(anyhow::Error::new(e)))?;
        let summary = match summary {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("summary".to_string(), other);
                map
            }
        };
        Ok(Self { result, summary })
    }
}

/// The work one stage delegates to its collaborator
#[async_trait]
pub trait StageWorker: Send + Sync {
    fn stage(&self) -> Stage;

    async fn execute(
        &self,
        request: &ItineraryRequest,
        results: &StageResultCache,
    ) -> Result<StageOutput, PipelineError>;
}

pub struct StageAgent {
    worker: Box<dyn StageWorker>,
    ctx: PipelineContext,
}

impl StageAgent {
    pub fn new(worker: impl StageWorker + 'static, ctx: PipelineContext) -> Self {
        Self {
            worker: Box::new(worker),
            ctx,
        }
    }

    pub fn stage(&self) -> Stage {
        self.worker.stage()
    }

    #[tracing::instrument(
        name = "stage_agent",
        skip(self, invocation),
        fields(stage = %self.stage(), request_id = %invocation.request_id)
    )]
    pub async fn run(&self, invocation: &StageInvocation) -> Result<StageOutcome, PipelineError> {
        let started = Instant::now();
        let stage = self.stage();

        let request = self.ctx.requests.require(&invocation.request_id)?;

        if let Some(outcome) = self.replay(&request, started) {
            tracing::info!("Stage already completed, replaying recorded summary");
            return Ok(outcome);
        }

        if let Some(upstream) = stage.upstream() {
            if !self.ctx.results.contains(upstream, &request.id)? {
                return Err(PipelineError::MissingUpstreamResult {
                    stage: upstream,
                    request_id: request.id.clone(),
                });
            }
        }

        self.check_active(&request, invocation)?;

        match self.advance(request, started).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => self.recover(&invocation.request_id, err, started),
        }
    }

    /// The recorded outcome if this stage already completed and is not running again
    fn replay(&self, request: &ItineraryRequest, started: Instant) -> Option<StageOutcome> {
        let stage = self.stage();
        if request.running_entry(stage).is_some() {
            return None;
        }

        let entry = request.last_entry_for(stage)?;
        (entry.status == LogStatus::Completed).then(|| StageOutcome {
            request_id: request.id.clone(),
            stage,
            summary: entry.data.clone(),
            processing_time_ms: elapsed_ms(started),
            replayed: true,
            next: None,
        })
    }

    fn check_active(
        &self,
        request: &ItineraryRequest,
        invocation: &StageInvocation,
    ) -> Result<(), PipelineError> {
        let stage = self.stage();
        let entry = request
            .running_entry(stage)
            .filter(|_| request.status.active_stage() == Some(stage))
            .ok_or(PipelineError::InvalidTransition {
                from: request.status,
                event: PipelineEvent::StageCompleted(stage),
            })?;

        match &invocation.idempotency_key {
            Some(key) if *key != entry.invocation_id => Err(PipelineError::Conflict(format!(
                "idempotency key does not match the running {} invocation",
                stage
            ))),
            _ => Ok(()),
        }
    }

    async fn advance(
        &self,
        mut request: ItineraryRequest,
        started: Instant,
    ) -> Result<StageOutcome, PipelineError> {
        let stage = self.stage();

        let output = self.worker.execute(&request, &self.ctx.results).await?;

        request.complete_stage(stage, output.summary.clone())?;
        request.apply(PipelineEvent::StageCompleted(stage))?;

        let handoff = stage.next().map(|next| {
            let token = new_invocation_id();
            request.start_stage(next, token.clone());
            (next, token)
        });

        self.ctx.requests.save(&mut request)?;
        tracing::info!(status = %request.status, "Stage completed");

        // Only the invocation that won the save writes the result
        if let Err(e) = self.ctx.results.put(stage, &request.id, &output.result) {
            match &handoff {
                Some((next, _)) => {
                    return Err(PipelineError::Handoff {
                        stage: *next,
                        message: format!("{} result could not be stored: {}", stage, e),
                    })
                }
                None => tracing::warn!("Failed to store final stage result: {}", e),
            }
        }

        let next = match handoff {
            Some((next, token)) => {
                self.ctx
                    .transport
                    .dispatch(next, StageInvocation::new(request.id.clone(), token))
                    .await?;
                Some(next)
            }
            None => {
                self.finalize(&request.id);
                None
            }
        };

        Ok(StageOutcome {
            request_id: request.id,
            stage,
            summary: output.summary,
            processing_time_ms: elapsed_ms(started),
            replayed: false,
            next,
        })
    }

    /// Drop the intermediate keys once the pipeline has completed
    fn finalize(&self, request_id: &str) {
        match self.ctx.results.clear(request_id) {
            Ok(removed) => tracing::debug!(removed, "Stage results cleared"),
            Err(e) => tracing::warn!("Failed to clear stage results: {}", e),
        }
        if let Err(e) = self.ctx.timeouts.delete(request_id) {
            tracing::warn!("Failed to delete timeout record: {}", e);
        }
        tracing::info!("Pipeline completed");
    }

    fn recover(
        &self,
        request_id: &str,
        err: PipelineError,
        started: Instant,
    ) -> Result<StageOutcome, PipelineError> {
        // A concurrent invocation may have completed this stage first
        if matches!(err, PipelineError::Conflict(_)) {
            if let Ok(request) = self.ctx.requests.require(request_id) {
                if let Some(outcome) = self.replay(&request, started) {
                    tracing::info!("Stage completed by a concurrent invocation");
                    return Ok(outcome);
                }
            }
        }

        let attributed = match &err {
            PipelineError::Handoff { stage, .. } => *stage,
            _ => self.stage(),
        };
        if let Err(fail_err) = self.ctx.failures.fail(request_id, attributed, &err) {
            tracing::error!(
                "Could not record failure ({}) for request: {}",
                err,
                fail_err
            );
        }
        Err(err)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// External services the stage workers delegate to
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn ContentGenerator>,
    pub verifier: Arc<dyn PlaceVerifier>,
    pub archive: Arc<dyn ItineraryArchive>,
}

/// One agent per stage
pub struct StageAgents {
    research: StageAgent,
    curation: StageAgent,
    validation: StageAgent,
    response: StageAgent,
}

impl StageAgents {
    pub fn new(ctx: &PipelineContext, collaborators: Collaborators) -> Self {
        let Collaborators {
            generator,
            verifier,
            archive,
        } = collaborators;

        Self {
            research: StageAgent::new(ResearchSkill::new(Arc::clone(&generator)), ctx.clone()),
            curation: StageAgent::new(CurationSkill::new(generator), ctx.clone()),
            validation: StageAgent::new(
                ValidationSkill::new(verifier, ctx.config.validation_delay()),
                ctx.clone(),
            ),
            response: StageAgent::new(ResponseSkill::new(archive), ctx.clone()),
        }
    }

    pub fn get(&self, stage: Stage) -> &StageAgent {
        match stage {
            Stage::Research => &self.research,
            Stage::Curation => &self.curation,
            Stage::Validation => &self.validation,
            Stage::Response => &self.response,
        }
    }
}

//! # Content Generator
//!
//! The LLM collaborator behind the research and curation stages. Drafts are
//! what the model returns; the stage skills validate them into typed results.

use async_trait::async_trait;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::artifact_registry::ResearchResult;
use super::prompts;
use crate::config::PipelineConfig;
use crate::models::ModelConfig;
use crate::pipeline::PipelineError;
use crate::run_llm_function;

/// A place suggested by the research call
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct PlaceDraft {
    pub name: String,
    /// Kind of place: museum, market, viewpoint...
    pub category: String,
    /// Neighborhood or district
    #[serde(default)]
    pub area: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct ResearchDraft {
    pub destination: String,
    pub overview: String,
    #[serde(default)]
    pub neighborhoods: Vec<String>,
    pub candidate_places: Vec<PlaceDraft>,
    #[serde(default)]
    pub travel_tips: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct ActivityDraft {
    pub name: String,
    /// Morning, afternoon, evening or a clock time
    pub time_slot: String,
    pub location: String,
    #[serde(default)]
    pub description: String,
    /// Per-person cost, omitted when unknown
    #[serde(default)]
    pub estimated_cost: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct DayDraft {
    /// 1-based day number
    pub day: i64,
    pub theme: String,
    pub activities: Vec<ActivityDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct CurationDraft {
    pub days: Vec<DayDraft>,
}

/// The generator answered, but not in the shape of the requested draft
#[derive(Debug, Error)]
#[error("malformed {kind} output: {reason}")]
pub struct MalformedOutput {
    pub kind: &'static str,
    pub reason: String,
}

/// Map a generator failure: malformed output is a validation error, anything
/// else an upstream failure
pub fn generation_error(err: anyhow::Error) -> PipelineError {
    match err.downcast_ref::<MalformedOutput>() {
        Some(malformed) => PipelineError::Validation(malformed.to_string()),
        None => PipelineError::upstream(err),
    }
}

/// Tag output that failed to decode against the draft schema
fn classify(kind: &'static str, err: anyhow::Error) -> anyhow::Error {
    match err.chain().find_map(|cause| cause.downcast_ref::<serde_json::Error>()) {
        Some(decode) => MalformedOutput {
            kind,
            reason: decode.to_string(),
        }
        .into(),
        None => err,
    }
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn research(&self, requirements: &Value) -> anyhow::Result<ResearchDraft>;

    async fn curate(
        &self,
        requirements: &Value,
        research: &ResearchResult,
    ) -> anyhow::Result<CurationDraft>;
}

/// Generator backed by radkit structured-output calls
pub struct LlmContentGenerator {
    research_model: ModelConfig,
    curation_model: ModelConfig,
}

impl LlmContentGenerator {
    pub fn new(research_model: ModelConfig, curation_model: ModelConfig) -> Self {
        for config in [&research_model, &curation_model] {
            if config.base_url.is_some() && !config.provider.supports_base_url() {
                tracing::warn!(
                    "base_url is ignored for provider {}",
                    config.provider.display_name()
                );
            }
        }
        Self {
            research_model,
            curation_model,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.research_model.clone(), config.curation_model.clone())
    }
}

#[async_trait]
impl ContentGenerator for LlmContentGenerator {
    async fn research(&self, requirements: &Value) -> anyhow::Result<ResearchDraft> {
        let prompt = format!(
            "Traveler requirements:\n{}",
            serde_json::to_string_pretty(requirements)?
        );
        tracing::debug!(model = %self.research_model.model, "Requesting destination research");
        let draft: anyhow::Result<ResearchDraft> =
            run_llm_function!(&self.research_model, ResearchDraft, prompts::RESEARCH, prompt);
        draft.map_err(|e| classify("research", e))
    }

    async fn curate(
        &self,
        requirements: &Value,
        research: &ResearchResult,
    ) -> anyhow::Result<CurationDraft> {
        let prompt = format!(
            "Traveler requirements:\n{}\n\nResearch:\n{}",
            serde_json::to_string_pretty(requirements)?,
            serde_json::to_string_pretty(research)?
        );
        tracing::debug!(model = %self.curation_model.model, "Requesting itinerary curation");
        let draft: anyhow::Result<CurationDraft> =
            run_llm_function!(&self.curation_model, CurationDraft, prompts::CURATION, prompt);
        draft.map_err(|e| classify("curation", e))
    }
}

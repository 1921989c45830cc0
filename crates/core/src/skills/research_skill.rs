//! # Research Skill
//!
//! First stage: asks the content generator for destination research and
//! validates the draft into a `ResearchResult`.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

use super::artifact_registry::{CandidatePlace, ResearchResult};
use super::generator::{generation_error, ContentGenerator, ResearchDraft};
use crate::pipeline::{PipelineError, Stage, StageOutput, StageWorker};
use crate::state::{ItineraryRequest, StageResultCache};

pub struct ResearchSkill {
    generator: Arc<dyn ContentGenerator>,
}

impl ResearchSkill {
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl StageWorker for ResearchSkill {
    fn stage(&self) -> Stage {
        Stage::Research
    }

    async fn execute(
        &self,
        request: &ItineraryRequest,
        _results: &StageResultCache,
    ) -> Result<StageOutput, PipelineError> {
        let draft = self
            .generator
            .research(&request.requirements)
            .await
            .map_err(generation_error)?;

        let result = normalize(draft)?;
        tracing::info!(
            destination = %result.destination,
            places = result.candidate_places.len(),
            "Research complete"
        );

        StageOutput::new(
            &result,
            json!({
                "destinationAnalyzed": result.destination,
                "placesFound": result.candidate_places.len(),
            }),
        )
    }
}

/// Validate a research draft into a `ResearchResult`
///
/// Destination, overview and every place's name and category are required;
/// repeated place names are dropped.
pub fn normalize(draft: ResearchDraft) -> Result<ResearchResult, PipelineError> {
    let invalid = PipelineError::Validation;

    let destination = draft.destination.trim().to_string();
    if destination.is_empty() {
        return Err(invalid("research draft names no destination".to_string()));
    }

    let overview = draft.overview.trim().to_string();
    if overview.is_empty() {
        return Err(invalid("research draft has no overview".to_string()));
    }

    let mut seen = HashSet::new();
    let mut candidate_places = Vec::with_capacity(draft.candidate_places.len());
    for (index, place) in draft.candidate_places.into_iter().enumerate() {
        let name = place.name.trim();
        if name.is_empty() {
            return Err(invalid(format!("candidate place {} has no name", index + 1)));
        }
        let category = place.category.trim();
        if category.is_empty() {
            return Err(invalid(format!("candidate place '{}' has no category", name)));
        }
        if !seen.insert(name.to_lowercase()) {
            continue;
        }
        candidate_places.push(CandidatePlace {
            name: name.to_string(),
            category: category.to_string(),
            area: place.area.trim().to_string(),
            description: place.description.trim().to_string(),
        });
    }

    if candidate_places.is_empty() {
        return Err(invalid("research draft has no candidate places".to_string()));
    }

    Ok(ResearchResult {
        destination,
        overview,
        neighborhoods: trimmed(draft.neighborhoods),
        candidate_places,
        travel_tips: trimmed(draft.travel_tips),
        generated_at: Utc::now(),
    })
}

fn trimmed(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

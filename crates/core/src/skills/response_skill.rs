//! # Response Skill
//!
//! Last stage: composes the final itinerary from the cached research and
//! validation results and archives it.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use super::artifact_registry::{FinalItinerary, ResearchResult, ValidationResult};
use crate::pipeline::{PipelineError, Stage, StageOutput, StageWorker};
use crate::state::{ItineraryArchive, ItineraryRequest, StageResultCache};

pub struct ResponseSkill {
    archive: Arc<dyn ItineraryArchive>,
}

impl ResponseSkill {
    pub fn new(archive: Arc<dyn ItineraryArchive>) -> Self {
        Self { archive }
    }
}

#[async_trait]
impl StageWorker for ResponseSkill {
    fn stage(&self) -> Stage {
        Stage::Response
    }

    async fn execute(
        &self,
        request: &ItineraryRequest,
        results: &StageResultCache,
    ) -> Result<StageOutput, PipelineError> {
        let validation: ValidationResult = results.require(Stage::Validation, &request.id)?;
        let research: ResearchResult = results.require(Stage::Research, &request.id)?;

        let itinerary = FinalItinerary::compose(&request.id, &request.user_id, &research, &validation);
        self.archive.store(&itinerary).await?;

        StageOutput::new(
            &itinerary,
            json!({
                "itineraryId": itinerary.request_id,
                "title": itinerary.title,
                "daysPlanned": itinerary.stats.total_days,
                "verifiedActivities": itinerary.stats.verified_activities,
            }),
        )
    }
}

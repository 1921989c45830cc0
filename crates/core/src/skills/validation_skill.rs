//! # Validation Skill
//!
//! Third stage: checks every curated activity against the place directory.
//! Calls are made one at a time with a fixed pause between them to stay
//! inside the directory's rate limit. A failed lookup is recorded on that
//! activity and never fails the stage.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::artifact_registry::{
    CurationResult, ValidatedActivity, ValidatedDay, ValidationResult, Verification,
};
use super::places::PlaceVerifier;
use crate::pipeline::{PipelineError, Stage, StageOutput, StageWorker};
use crate::state::{ItineraryRequest, StageResultCache};

pub struct ValidationSkill {
    verifier: Arc<dyn PlaceVerifier>,
    delay: Duration,
}

impl ValidationSkill {
    pub fn new(verifier: Arc<dyn PlaceVerifier>, delay: Duration) -> Self {
        Self { verifier, delay }
    }

    async fn verify_all(&self, curation: &CurationResult) -> ValidationResult {
        let mut days = Vec::with_capacity(curation.days.len());
        let mut first = true;

        for day in &curation.days {
            let mut activities = Vec::with_capacity(day.activities.len());
            for activity in &day.activities {
                if !first && !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                first = false;

                let verification = match self.verifier.verify(&activity.name, &activity.location).await {
                    Ok(Some(place)) => Verification::from(place),
                    Ok(None) => Verification::NotFound,
                    Err(e) => {
                        tracing::warn!(activity = %activity.name, "Place verification failed: {:#}", e);
                        Verification::Failed {
                            reason: format!("{:#}", e),
                        }
                    }
                };
                activities.push(ValidatedActivity {
                    activity: activity.clone(),
                    verification,
                });
            }
            days.push(ValidatedDay {
                day: day.day,
                theme: day.theme.clone(),
                activities,
            });
        }

        ValidationResult::from_days(&curation.destination, days)
    }
}

#[async_trait]
impl StageWorker for ValidationSkill {
    fn stage(&self) -> Stage {
        Stage::Validation
    }

    async fn execute(
        &self,
        request: &ItineraryRequest,
        results: &StageResultCache,
    ) -> Result<StageOutput, PipelineError> {
        let curation: CurationResult = results.require(Stage::Curation, &request.id)?;
        let result = self.verify_all(&curation).await;

        tracing::info!(
            verified = result.verified_count,
            not_found = result.not_found_count,
            failed = result.failed_count,
            "Validation complete"
        );

        StageOutput::new(
            &result,
            json!({
                "activitiesValidated": curation.activity_count(),
                "verifiedCount": result.verified_count,
                "notFoundCount": result.not_found_count,
                "failedCount": result.failed_count,
            }),
        )
    }
}

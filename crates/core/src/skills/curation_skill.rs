//! # Curation Skill
//!
//! Second stage: turns the cached research into a day-by-day plan through
//! the content generator.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

use super::artifact_registry::{Activity, CurationResult, DayPlan, ResearchResult};
use super::generator::{generation_error, ContentGenerator, CurationDraft};
use crate::pipeline::{PipelineError, Stage, StageOutput, StageWorker};
use crate::state::{ItineraryRequest, StageResultCache};

pub struct CurationSkill {
    generator: Arc<dyn ContentGenerator>,
}

impl CurationSkill {
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl StageWorker for CurationSkill {
    fn stage(&self) -> Stage {
        Stage::Curation
    }

    async fn execute(
        &self,
        request: &ItineraryRequest,
        results: &StageResultCache,
    ) -> Result<StageOutput, PipelineError> {
        let research: ResearchResult = results.require(Stage::Research, &request.id)?;

        let draft = self
            .generator
            .curate(&request.requirements, &research)
            .await
            .map_err(generation_error)?;

        let result = normalize(&research.destination, draft)?;
        let activities = result.activity_count();
        tracing::info!(days = result.days.len(), activities, "Curation complete");

        StageOutput::new(
            &result,
            json!({
                "daysPlanned": result.days.len(),
                "activitiesPlanned": activities,
            }),
        )
    }
}

/// Validate a curation draft: days numbered 1..=n, every day themed, every
/// activity with a name, time slot and location
pub fn normalize(destination: &str, draft: CurationDraft) -> Result<CurationResult, PipelineError> {
    let invalid = PipelineError::Validation;

    let mut drafts = draft.days;
    if drafts.is_empty() {
        return Err(invalid("curation draft has no days".to_string()));
    }
    drafts.sort_by_key(|d| d.day);

    let total = drafts.len();
    let mut days = Vec::with_capacity(total);
    for (index, day) in drafts.into_iter().enumerate() {
        let expected = index as i64 + 1;
        if day.day != expected {
            return Err(invalid(format!(
                "curation days must run 1..={} without gaps, found day {} at position {}",
                total,
                day.day,
                expected
            )));
        }
        if day.activities.is_empty() {
            return Err(invalid(format!("day {} has no activities", day.day)));
        }

        let mut activities = Vec::with_capacity(day.activities.len());
        for a in day.activities {
            let name = a.name.trim();
            let location = a.location.trim();
            if name.is_empty() || location.is_empty() {
                return Err(invalid(format!(
                    "day {} has an activity without a name or location",
                    day.day
                )));
            }
            if let Some(cost) = a.estimated_cost {
                if !cost.is_finite() || cost < 0.0 {
                    return Err(invalid(format!(
                        "activity '{}' has invalid cost {}",
                        name, cost
                    )));
                }
            }
            let time_slot = a.time_slot.trim();
            if time_slot.is_empty() {
                return Err(invalid(format!("activity '{}' has no time slot", name)));
            }
            activities.push(Activity {
                name: name.to_string(),
                time_slot: time_slot.to_string(),
                location: location.to_string(),
                description: a.description.trim().to_string(),
                estimated_cost: a.estimated_cost,
            });
        }

        let theme = day.theme.trim();
        if theme.is_empty() {
            return Err(invalid(format!("day {} has no theme", day.day)));
        }
        days.push(DayPlan {
            day: expected as u32,
            theme: theme.to_string(),
            activities,
        });
    }

    Ok(CurationResult {
        destination: destination.to_string(),
        days,
        generated_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::generator::{ActivityDraft, DayDraft};

    fn activity(name: &str) -> ActivityDraft {
        ActivityDraft {
            name: name.to_string(),
            time_slot: "morning".to_string(),
            location: "Lisbon".to_string(),
            description: String::new(),
            estimated_cost: Some(10.0),
        }
    }

    fn day(n: i64) -> DayDraft {
        DayDraft {
            day: n,
            theme: format!("Theme {n}"),
            activities: vec![activity(&format!("Stop {n}"))],
        }
    }

    #[test]
    fn test_days_are_sorted() {
        let result = normalize(
            "Lisbon",
            CurationDraft {
                days: vec![day(2), day(1)],
            },
        )
        .unwrap();
        assert_eq!(result.days[0].day, 1);
        assert_eq!(result.days[0].theme, "Theme 1");
        assert_eq!(result.days[1].activities[0].name, "Stop 2");
        assert_eq!(result.days[0].activities[0].time_slot, "morning");
        assert_eq!(result.activity_count(), 2);
    }

    #[test]
    fn test_rejects_malformed_drafts() {
        let gap = CurationDraft {
            days: vec![day(1), day(3)],
        };
        assert!(matches!(
            normalize("Lisbon", gap),
            Err(PipelineError::Validation(_))
        ));

        assert!(normalize("Lisbon", CurationDraft { days: vec![] }).is_err());

        let mut empty_day = day(1);
        empty_day.activities.clear();
        assert!(normalize("Lisbon", CurationDraft { days: vec![empty_day] }).is_err());

        let mut negative = day(1);
        negative.activities[0].estimated_cost = Some(-5.0);
        assert!(normalize("Lisbon", CurationDraft { days: vec![negative] }).is_err());

        let mut nameless = day(1);
        nameless.activities[0].name = " ".to_string();
        assert!(normalize("Lisbon", CurationDraft { days: vec![nameless] }).is_err());
    }

    #[test]
    fn test_blank_time_slot_is_invalid() {
        let mut d = day(1);
        d.activities[0].time_slot = "  ".to_string();
        assert!(matches!(
            normalize("Lisbon", CurationDraft { days: vec![d] }),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn test_blank_theme_is_invalid() {
        let mut d = day(1);
        d.theme = String::new();
        assert!(matches!(
            normalize("Lisbon", CurationDraft { days: vec![d] }),
            Err(PipelineError::Validation(_))
        ));
    }
}

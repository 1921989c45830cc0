//! # Stage Artifact Registry
//!
//! Typed results each stage writes to the stage result cache. The next stage
//! deserializes exactly the type its upstream produced, so a shape mismatch
//! surfaces as a decode error instead of a missing field deep in the work.
//!
//! ## Flow
//!
//! ```text
//! research   -> ResearchResult
//! curation   -> CurationResult      (reads ResearchResult)
//! validation -> ValidationResult    (reads CurationResult)
//! response   -> FinalItinerary      (reads ValidationResult + ResearchResult)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Research Artifacts
// ============================================================================

/// A place worth considering for the itinerary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePlace {
    pub name: String,
    pub category: String,
    pub area: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResearchResult {
    pub destination: String,
    pub overview: String,
    pub neighborhoods: Vec<String>,
    pub candidate_places: Vec<CandidatePlace>,
    pub travel_tips: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

// ============================================================================
// Curation Artifacts
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub name: String,
    pub time_slot: String,
    pub location: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DayPlan {
    /// 1-based day number
    pub day: u32,
    pub theme: String,
    pub activities: Vec<Activity>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurationResult {
    pub destination: String,
    pub days: Vec<DayPlan>,
    pub generated_at: DateTime<Utc>,
}

impl CurationResult {
    pub fn activity_count(&self) -> usize {
        self.days.iter().map(|d| d.activities.len()).sum()
    }
}

// ============================================================================
// Validation Artifacts
// ============================================================================

/// Outcome of verifying one activity against the place directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Verification {
    #[serde(rename_all = "camelCase")]
    Verified {
        place_id: String,
        formatted_address: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rating: Option<f64>,
    },
    NotFound,
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedActivity {
    #[serde(flatten)]
    pub activity: Activity,
    pub verification: Verification,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedDay {
    pub day: u32,
    pub theme: String,
    pub activities: Vec<ValidatedActivity>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub destination: String,
    pub days: Vec<ValidatedDay>,
    pub verified_count: usize,
    pub not_found_count: usize,
    pub failed_count: usize,
    pub validated_at: DateTime<Utc>,
}

impl ValidationResult {
    /// Build the result, tallying verification outcomes
    pub fn from_days(destination: impl Into<String>, days: Vec<ValidatedDay>) -> Self {
        let (mut verified, mut not_found, mut failed) = (0, 0, 0);
        for activity in days.iter().flat_map(|d| d.activities.iter()) {
            match activity.verification {
                Verification::Verified { .. } => verified += 1,
                Verification::NotFound => not_found += 1,
                Verification::Failed { .. } => failed += 1,
            }
        }

        Self {
            destination: destination.into(),
            days,
            verified_count: verified,
            not_found_count: not_found,
            failed_count: failed,
            validated_at: Utc::now(),
        }
    }
}

// ============================================================================
// Response Artifacts
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItineraryStats {
    pub total_days: usize,
    pub total_activities: usize,
    pub verified_activities: usize,
    pub estimated_total_cost: f64,
}

/// The finished itinerary, archived permanently
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FinalItinerary {
    pub request_id: String,
    pub user_id: String,
    pub title: String,
    pub destination: String,
    pub overview: String,
    pub days: Vec<ValidatedDay>,
    pub travel_tips: Vec<String>,
    pub stats: ItineraryStats,
    pub generated_at: DateTime<Utc>,
}

impl FinalItinerary {
    pub fn compose(
        request_id: impl Into<String>,
        user_id: impl Into<String>,
        research: &ResearchResult,
        validation: &ValidationResult,
    ) -> Self {
        let total_days = validation.days.len();
        let activities = validation.days.iter().flat_map(|d| d.activities.iter());
        let total_activities = activities.clone().count();
        let estimated_total_cost = activities
            .filter_map(|a| a.activity.estimated_cost)
            .sum();

        let title = match total_days {
            1 => format!("A day in {}", research.destination),
            n => format!("{} days in {}", n, research.destination),
        };

        Self {
            request_id: request_id.into(),
            user_id: user_id.into(),
            title,
            destination: research.destination.clone(),
            overview: research.overview.clone(),
            days: validation.days.clone(),
            travel_tips: research.travel_tips.clone(),
            stats: ItineraryStats {
                total_days,
                total_activities,
                verified_activities: validation.verified_count,
                estimated_total_cost,
            },
            generated_at: Utc::now(),
        }
    }
}

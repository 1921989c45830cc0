//! Scripted collaborators for tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Mutex;

use super::artifact_registry::ResearchResult;
use super::generator::{
    ActivityDraft, ContentGenerator, CurationDraft, DayDraft, MalformedOutput, PlaceDraft,
    ResearchDraft,
};
use super::places::{PlaceVerifier, VerifiedPlace};

/// How a scripted call fails
#[derive(Clone)]
enum Failure {
    Upstream(String),
    Malformed(&'static str),
}

impl Failure {
    fn into_error(self) -> anyhow::Error {
        match self {
            Failure::Upstream(message) => anyhow!(message),
            Failure::Malformed(kind) => MalformedOutput {
                kind,
                reason: "expected a JSON object".to_string(),
            }
            .into(),
        }
    }
}

pub struct ScriptedGenerator {
    research: std::result::Result<ResearchDraft, Failure>,
    curation: std::result::Result<CurationDraft, Failure>,
    calls: Mutex<Vec<&'static str>>,
}

fn activity(name: &str, cost: Option<f64>) -> ActivityDraft {
    ActivityDraft {
        name: name.to_string(),
        time_slot: "morning".to_string(),
        location: format!("{name}, Paris"),
        description: String::new(),
        estimated_cost: cost,
    }
}

impl ScriptedGenerator {
    /// Two days in Paris: Louvre and Orsay, then Montmartre
    pub fn new() -> Self {
        let research = ResearchDraft {
            destination: "Paris".to_string(),
            overview: "The city of light".to_string(),
            neighborhoods: vec!["Le Marais".to_string()],
            candidate_places: ["Louvre", "Orsay", "Montmartre"]
                .into_iter()
                .map(|name| PlaceDraft {
                    name: name.to_string(),
                    category: "landmark".to_string(),
                    area: "Paris".to_string(),
                    description: String::new(),
                })
                .collect(),
            travel_tips: vec!["Buy a museum pass".to_string()],
        };
        let curation = CurationDraft {
            days: vec![
                DayDraft {
                    day: 1,
                    theme: "Museums".to_string(),
                    activities: vec![activity("Louvre", Some(22.0)), activity("Orsay", Some(16.0))],
                },
                DayDraft {
                    day: 2,
                    theme: "Walks".to_string(),
                    activities: vec![activity("Montmartre", None)],
                },
            ],
        };

        Self {
            research: Ok(research),
            curation: Ok(curation),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_research(mut self, message: &str) -> Self {
        self.research = Err(Failure::Upstream(message.to_string()));
        self
    }

    pub fn failing_curation(mut self, message: &str) -> Self {
        self.curation = Err(Failure::Upstream(message.to_string()));
        self
    }

    /// Curation answers with output that does not decode into a draft
    pub fn malformed_curation(mut self) -> Self {
        self.curation = Err(Failure::Malformed("curation"));
        self
    }

    pub fn with_curation(mut self, draft: CurationDraft) -> Self {
        self.curation = Ok(draft);
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn research(&self, _requirements: &Value) -> Result<ResearchDraft> {
        self.calls.lock().unwrap().push("research");
        self.research.clone().map_err(Failure::into_error)
    }

    async fn curate(&self, _requirements: &Value, _research: &ResearchResult) -> Result<CurationDraft> {
        self.calls.lock().unwrap().push("curate");
        self.curation.clone().map_err(Failure::into_error)
    }
}

/// Verifies every place except those marked missing or failing
#[derive(Default)]
pub struct FakeVerifier {
    missing: HashSet<String>,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn missing(mut self, name: &str) -> Self {
        self.missing.insert(name.to_string());
        self
    }

    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlaceVerifier for FakeVerifier {
    async fn verify(&self, name: &str, _location: &str) -> Result<Option<VerifiedPlace>> {
        self.calls.lock().unwrap().push(name.to_string());
        if self.failing.contains(name) {
            return Err(anyhow!("OVER_QUERY_LIMIT"));
        }
        if self.missing.contains(name) {
            return Ok(None);
        }
        Ok(Some(VerifiedPlace {
            place_id: format!("place-{}", name.to_lowercase()),
            formatted_address: format!("{name}, Paris, France"),
            rating: Some(4.5),
        }))
    }
}

//! # Pipeline Configuration
//!
//! Loaded from `.itinerary/config.json` when present, then overridden from
//! the environment (`ITINERARY_*`, `GOOGLE_PLACES_API_KEY`). Every field has a
//! default so an empty or missing file is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::models::{LlmProvider, ModelConfig};
use crate::state::db::DEFAULT_DB_PATH;

pub const DEFAULT_CONFIG_PATH: &str = ".itinerary/config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// SQLite database file
    pub db_path: String,
    /// Shared secret required on stage endpoints
    pub internal_secret: String,
    /// Base URL stage handoffs are posted to
    pub agent_base_url: String,
    pub request_ttl_secs: u64,
    pub result_ttl_secs: u64,
    /// Total processing budget per request
    pub timeout_budget_ms: u64,
    /// Pause between place verification calls
    pub validation_delay_ms: u64,
    /// Extra handoff attempts after the first
    pub handoff_retries: u32,
    pub handoff_backoff_ms: u64,
    pub handoff_timeout_secs: u64,
    pub places_api_key: Option<String>,
    pub places_base_url: String,
    pub research_model: ModelConfig,
    pub curation_model: ModelConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            internal_secret: String::new(),
            agent_base_url: "http://127.0.0.1:8080".to_string(),
            request_ttl_secs: 3600,
            result_ttl_secs: 3600,
            timeout_budget_ms: 20_000,
            validation_delay_ms: 250,
            handoff_retries: 2,
            handoff_backoff_ms: 500,
            handoff_timeout_secs: 300,
            places_api_key: None,
            places_base_url: "https://maps.googleapis.com/maps/api/place".to_string(),
            research_model: ModelConfig::for_provider(LlmProvider::OpenAI),
            curation_model: ModelConfig::for_provider(LlmProvider::OpenAI),
        }
    }
}

impl PipelineConfig {
    /// Load from the default path plus environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(DEFAULT_CONFIG_PATH)?;
        config.apply_env();
        Ok(config)
    }

    /// Load from a JSON file; a missing file yields the defaults
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid pipeline config in {}", path.display()))
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup("ITINERARY_INTERNAL_SECRET") {
            self.internal_secret = secret;
        }
        if let Some(url) = lookup("ITINERARY_AGENT_BASE_URL") {
            self.agent_base_url = url;
        }
        if let Some(path) = lookup("ITINERARY_DB_PATH") {
            self.db_path = path;
        }
        if let Some(key) = lookup("GOOGLE_PLACES_API_KEY") {
            self.places_api_key = Some(key);
        }

        let numeric = |key: &str| {
            lookup(key).and_then(|raw| match raw.trim().parse::<u64>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring non-numeric {}={}", key, raw);
                    None
                }
            })
        };
        if let Some(ms) = numeric("ITINERARY_TIMEOUT_BUDGET_MS") {
            self.timeout_budget_ms = ms;
        }
        if let Some(ms) = numeric("ITINERARY_VALIDATION_DELAY_MS") {
            self.validation_delay_ms = ms;
        }
    }

    pub fn request_ttl(&self) -> Duration {
        Duration::from_secs(self.request_ttl_secs)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn validation_delay(&self) -> Duration {
        Duration::from_millis(self.validation_delay_ms)
    }

    pub fn handoff_backoff(&self) -> Duration {
        Duration::from_millis(self.handoff_backoff_ms)
    }

    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_secs(self.handoff_timeout_secs)
    }
}

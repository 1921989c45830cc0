//! # Place Verification
//!
//! Confirms a curated activity exists using the Google Places "find place
//! from text" endpoint.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::artifact_registry::Verification;
use crate::config::PipelineConfig;

/// A place the directory confirmed
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedPlace {
    pub place_id: String,
    pub formatted_address: String,
    pub rating: Option<f64>,
}

impl From<VerifiedPlace> for Verification {
    fn from(place: VerifiedPlace) -> Self {
        Verification::Verified {
            place_id: place.place_id,
            formatted_address: place.formatted_address,
            rating: place.rating,
        }
    }
}

#[async_trait]
pub trait PlaceVerifier: Send + Sync {
    /// `Ok(None)` when the directory has no match
    async fn verify(&self, name: &str, location: &str) -> Result<Option<VerifiedPlace>>;
}

#[derive(Debug, Deserialize)]
struct FindPlaceResponse {
    status: String,
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    place_id: String,
    #[serde(default)]
    formatted_address: String,
    #[serde(default)]
    rating: Option<f64>,
}

impl From<Candidate> for VerifiedPlace {
    fn from(c: Candidate) -> Self {
        Self {
            place_id: c.place_id,
            formatted_address: c.formatted_address,
            rating: c.rating,
        }
    }
}

pub struct GooglePlacesVerifier {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl GooglePlacesVerifier {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        if config.places_api_key.is_none() {
            tracing::warn!("GOOGLE_PLACES_API_KEY not set, every place verification will fail");
        }
        Self::new(&config.places_base_url, config.places_api_key.clone())
    }

    fn query_url(&self, query: &str, key: &str) -> String {
        format!(
            "{}/findplacefromtext/json?input={}&inputtype=textquery&fields=place_id,formatted_address,rating&key={}",
            self.base_url,
            urlencoding::encode(query),
            urlencoding::encode(key)
        )
    }
}

#[async_trait]
impl PlaceVerifier for GooglePlacesVerifier {
    async fn verify(&self, name: &str, location: &str) -> Result<Option<VerifiedPlace>> {
        let key = self
            .api_key
            .as_deref()
            .context("Places API key is not configured")?;

        let query = format!("{} {}", name, location);
        let response: FindPlaceResponse = self
            .client
            .get(self.query_url(&query, key))
            .send()
            .await
            .context("Places API request failed")?
            .error_for_status()?
            .json()
            .await
            .context("Unreadable Places API response")?;

        parse_find_place(response)
    }
}

fn parse_find_place(response: FindPlaceResponse) -> Result<Option<VerifiedPlace>> {
    match response.status.as_str() {
        "OK" => Ok(response.candidates.into_iter().next().map(VerifiedPlace::from)),
        "ZERO_RESULTS" => Ok(None),
        other => bail!(
            "Places API returned {}{}",
            other,
            response
                .error_message
                .map(|m| format!(": {}", m))
                .unwrap_or_default()
        ),
    }
}

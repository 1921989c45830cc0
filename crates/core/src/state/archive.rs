//! # Itinerary Archive
//!
//! Durable record of finished itineraries. Unlike the pipeline keys this
//! never expires; the response stage writes here before the request is
//! marked completed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

use super::db::PipelineDb;
use crate::skills::artifact_registry::FinalItinerary;

/// Durable itinerary record store
#[async_trait]
pub trait ItineraryArchive: Send + Sync {
    /// Store a finished itinerary, replacing any earlier copy for the same request
    async fn store(&self, itinerary: &FinalItinerary) -> Result<()>;

    async fn fetch(&self, request_id: &str) -> Result<Option<FinalItinerary>>;
}

/// Archive backed by the `itineraries` table
pub struct SqliteItineraryArchive {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteItineraryArchive {
    pub fn new(db: &PipelineDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }
}

#[async_trait]
impl ItineraryArchive for SqliteItineraryArchive {
    async fn store(&self, itinerary: &FinalItinerary) -> Result<()> {
        let data = serde_json::to_string(itinerary)?;
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO itineraries (request_id, user_id, destination, data, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                itinerary.request_id,
                itinerary.user_id,
                itinerary.destination,
                data,
                itinerary.generated_at.to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to archive itinerary {}", itinerary.request_id))?;

        tracing::info!(request_id = %itinerary.request_id, "Itinerary archived");
        Ok(())
    }

    async fn fetch(&self, request_id: &str) -> Result<Option<FinalItinerary>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM itineraries WHERE request_id = ?1",
                params![request_id],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("Corrupt archived itinerary")?,
            )),
            None => Ok(None),
        }
    }
}

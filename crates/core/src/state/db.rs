//! # Pipeline Database
//!
//! Single SQLite database for all pipeline state: the TTL-bound key-value
//! entries (requests, stage results, timeout records) and the durable
//! itinerary archive. Lives at `.itinerary/pipeline.db` by default.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Default on-disk location
pub const DEFAULT_DB_PATH: &str = ".itinerary/pipeline.db";

/// Database manager shared by every store
pub struct PipelineDb {
    conn: Arc<Mutex<Connection>>,
}

impl PipelineDb {
    /// Open or create the database at a specific path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(path.as_ref()).context("Failed to open pipeline database")?;
        Self::with_connection(conn)
    }

    /// Private in-memory database (tests, one-shot CLI runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Get a shared connection for use by the stores
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
        }

        Ok(())
    }

    /// Migration to version 1 - key-value entries and the itinerary archive
    fn migrate_v1(conn: &Connection) -> Result<()> {
        // TTL-bound entries; `revision` backs compare-and-swap writes
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                revision INTEGER NOT NULL DEFAULT 1,
                expires_at INTEGER NOT NULL
            )
            "#,
            [],
        )?;

        // Finalized itineraries (permanent artifact)
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS itineraries (
                request_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                destination TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_kv_expires ON kv_entries(expires_at)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_itineraries_user ON itineraries(user_id)",
            [],
        )?;

        tracing::info!(
            "PipelineDb initialized with schema version {}",
            SCHEMA_VERSION
        );

        Ok(())
    }
}

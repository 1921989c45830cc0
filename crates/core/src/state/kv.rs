//! # TTL Key-Value Store
//!
//! Expiring JSON entries on top of the `kv_entries` table. Every write bumps
//! the entry's revision so callers can do compare-and-swap updates.
//! Expired rows are invisible to reads and are reclaimed by `purge_expired`.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::db::PipelineDb;

/// A live entry
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: String,
    pub revision: i64,
}

/// SQLite-backed expiring key-value store
#[derive(Clone)]
pub struct TtlStore {
    conn: Arc<Mutex<Connection>>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry(ttl: Duration) -> i64 {
    now_ms().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

impl TtlStore {
    pub fn new(db: &PipelineDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// Read a live entry
    pub fn get(&self, key: &str) -> Result<Option<Entry>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value, revision FROM kv_entries WHERE key = ?1 AND expires_at > ?2",
            params![key, now_ms()],
            |row| {
                Ok(Entry {
                    value: row.get(0)?,
                    revision: row.get(1)?,
                })
            },
        )
        .optional()
        .with_context(|| format!("Failed to read '{}'", key))
    }

    /// Read and decode a live entry together with its revision
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<(T, i64)>> {
        match self.get(key)? {
            Some(entry) => {
                let value = serde_json::from_str(&entry.value)
                    .with_context(|| format!("Corrupt value stored under '{}'", key))?;
                Ok(Some((value, entry.revision)))
            }
            None => Ok(None),
        }
    }

    /// Check if a live entry exists
    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Unconditional write (SETEX semantics), returns the new revision
    pub fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<i64> {
        let data = serde_json::to_string(value)?;
        let conn = self.lock()?;
        let revision = conn
            .query_row(
                r#"
                INSERT INTO kv_entries (key, value, revision, expires_at)
                VALUES (?1, ?2, 1, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    revision = kv_entries.revision + 1,
                    expires_at = excluded.expires_at
                RETURNING revision
                "#,
                params![key, data, expiry(ttl)],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to write '{}'", key))?;
        Ok(revision)
    }

    /// Write only if no live entry exists; returns false when one does
    pub fn insert_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<bool> {
        let data = serde_json::to_string(value)?;
        let conn = self.lock()?;
        let affected = conn
            .execute(
                r#"
                INSERT INTO kv_entries (key, value, revision, expires_at)
                VALUES (?1, ?2, 1, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    revision = 1,
                    expires_at = excluded.expires_at
                WHERE kv_entries.expires_at <= ?4
                "#,
                params![key, data, expiry(ttl), now_ms()],
            )
            .with_context(|| format!("Failed to insert '{}'", key))?;
        Ok(affected == 1)
    }

    /// Replace the entry only if its revision still matches
    ///
    /// Returns the new revision, or `None` when the entry changed, expired or
    /// vanished since it was read.
    pub fn compare_and_swap_json<T: Serialize>(
        &self,
        key: &str,
        expected_revision: i64,
        value: &T,
        ttl: Duration,
    ) -> Result<Option<i64>> {
        let data = serde_json::to_string(value)?;
        let conn = self.lock()?;
        let affected = conn
            .execute(
                r#"
                UPDATE kv_entries
                SET value = ?2, revision = revision + 1, expires_at = ?3
                WHERE key = ?1 AND revision = ?4 AND expires_at > ?5
                "#,
                params![key, data, expiry(ttl), expected_revision, now_ms()],
            )
            .with_context(|| format!("Failed to update '{}'", key))?;

        Ok((affected == 1).then_some(expected_revision + 1))
    }

    /// Delete an entry, returns true if a live entry was removed
    pub fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let now = now_ms();
        let live: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM kv_entries WHERE key = ?1 AND expires_at > ?2",
                params![key, now],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count > 0)?;
        conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])
            .with_context(|| format!("Failed to delete '{}'", key))?;
        Ok(live)
    }

    /// List live keys starting with `prefix`
    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT key FROM kv_entries WHERE substr(key, 1, ?1) = ?2 AND expires_at > ?3 ORDER BY key",
        )?;
        let rows = stmt.query_map(
            params![prefix.chars().count() as i64, prefix, now_ms()],
            |row| row.get(0),
        )?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    /// Physically remove expired rows
    pub fn purge_expired(&self) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM kv_entries WHERE expires_at <= ?1",
            params![now_ms()],
        )?;
        if removed > 0 {
            tracing::debug!("Purged {} expired entries", removed);
        }
        Ok(removed)
    }
}

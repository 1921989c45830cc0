//! # Timeout Record Store
//!
//! One `processing_timeout:{id}` marker per request holding the processing
//! deadline. Only the timeout monitor reads it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::db::PipelineDb;
use super::kv::TtlStore;
use crate::pipeline::PipelineError;

const KEY_PREFIX: &str = "processing_timeout:";

/// The record outlives its budget by this factor so overruns stay observable
const RETENTION_FACTOR: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutRecord {
    pub start_time: DateTime<Utc>,
    pub max_duration_ms: u64,
}

impl TimeoutRecord {
    pub fn new(max_duration_ms: u64) -> Self {
        Self {
            start_time: Utc::now(),
            max_duration_ms,
        }
    }

    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.start_time).num_milliseconds()
    }

    pub fn is_exceeded(&self, now: DateTime<Utc>) -> bool {
        self.elapsed_ms(now) > self.max_duration_ms as i64
    }
}

pub struct TimeoutStore {
    kv: TtlStore,
}

impl TimeoutStore {
    pub fn new(db: &PipelineDb) -> Self {
        Self {
            kv: TtlStore::new(db),
        }
    }

    pub fn key(request_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, request_id)
    }

    /// Start the clock for a request
    pub fn start(
        &self,
        request_id: &str,
        max_duration_ms: u64,
    ) -> Result<TimeoutRecord, PipelineError> {
        let record = TimeoutRecord::new(max_duration_ms);
        self.put(request_id, &record)?;
        Ok(record)
    }

    pub fn put(&self, request_id: &str, record: &TimeoutRecord) -> Result<(), PipelineError> {
        let ttl = Duration::from_millis(record.max_duration_ms) * RETENTION_FACTOR;
        self.kv.put_json(&Self::key(request_id), record, ttl)?;
        Ok(())
    }

    pub fn get(&self, request_id: &str) -> Result<Option<TimeoutRecord>, PipelineError> {
        Ok(self
            .kv
            .get_json::<TimeoutRecord>(&Self::key(request_id))?
            .map(|(record, _)| record))
    }

    pub fn delete(&self, request_id: &str) -> Result<bool, PipelineError> {
        Ok(self.kv.delete(&Self::key(request_id))?)
    }

    /// Request ids with a live timeout record
    pub fn pending_ids(&self) -> Result<Vec<String>, PipelineError> {
        Ok(self
            .kv
            .keys_with_prefix(KEY_PREFIX)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(KEY_PREFIX).map(str::to_string))
            .collect())
    }
}

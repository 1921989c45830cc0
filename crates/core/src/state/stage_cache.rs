//! # Stage Result Cache
//!
//! Per-stage output blobs keyed by request id (`{stage}_results:{id}`).
//! Entries are weak references to the request: they expire on their own TTL
//! and stay readable after the pipeline later fails.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use super::db::PipelineDb;
use super::kv::TtlStore;
use crate::pipeline::{PipelineError, Stage};

pub struct StageResultCache {
    kv: TtlStore,
    ttl: Duration,
}

impl StageResultCache {
    pub fn new(db: &PipelineDb, ttl: Duration) -> Self {
        Self {
            kv: TtlStore::new(db),
            ttl,
        }
    }

    pub fn key(stage: Stage, request_id: &str) -> String {
        format!("{}_results:{}", stage.as_str(), request_id)
    }

    pub fn put<T: Serialize>(
        &self,
        stage: Stage,
        request_id: &str,
        result: &T,
    ) -> Result<(), PipelineError> {
        self.kv
            .put_json(&Self::key(stage, request_id), result, self.ttl)?;
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        stage: Stage,
        request_id: &str,
    ) -> Result<Option<T>, PipelineError> {
        Ok(self
            .kv
            .get_json::<T>(&Self::key(stage, request_id))?
            .map(|(value, _)| value))
    }

    /// Load a stage result or fail with `MissingUpstreamResult`
    pub fn require<T: DeserializeOwned>(
        &self,
        stage: Stage,
        request_id: &str,
    ) -> Result<T, PipelineError> {
        self.get(stage, request_id)?
            .ok_or_else(|| PipelineError::MissingUpstreamResult {
                stage,
                request_id: request_id.to_string(),
            })
    }

    pub fn contains(&self, stage: Stage, request_id: &str) -> Result<bool, PipelineError> {
        Ok(self.kv.contains(&Self::key(stage, request_id))?)
    }

    /// Drop every stage result for a request, returns how many were live
    pub fn clear(&self, request_id: &str) -> Result<usize, PipelineError> {
        let mut removed = 0;
        for stage in Stage::ALL {
            if self.kv.delete(&Self::key(stage, request_id))? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

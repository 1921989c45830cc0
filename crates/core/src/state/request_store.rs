//! # Request Store
//!
//! Durable, TTL-bound record of one itinerary request and its processing log.
//! Writes are compare-and-swap against the revision observed at load time, so
//! two invocations racing on the same request id cannot silently clobber each
//! other: the loser gets `PipelineError::Conflict`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use super::db::PipelineDb;
use super::kv::TtlStore;
use crate::pipeline::{PipelineError, PipelineEvent, RequestStatus, Stage};

/// Status of one processing log entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Running,
    Completed,
    Failed,
}

/// Failure record attached to a request and to the failing log entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// One stage attempt on a request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentProcessingLog {
    pub agent: Stage,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: LogStatus,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub error: Option<ProcessingError>,
    /// Idempotency token carried by the handoff that starts this attempt
    pub invocation_id: String,
}

/// An itinerary request moving through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItineraryRequest {
    pub id: String,
    pub user_id: String,
    /// Immutable user input, opaque to the pipeline
    pub requirements: Value,
    pub status: RequestStatus,
    #[serde(default)]
    pub processing_log: Vec<AgentProcessingLog>,
    #[serde(default)]
    pub error_details: Option<ProcessingError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Store revision observed when this copy was loaded
    #[serde(skip)]
    pub revision: i64,
}

/// Generate a fresh idempotency token
pub fn new_invocation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl ItineraryRequest {
    /// Create a new request in `initiated`
    pub fn new(user_id: impl Into<String>, requirements: Value) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), user_id, requirements)
    }

    pub fn with_id(id: impl Into<String>, user_id: impl Into<String>, requirements: Value) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            requirements,
            status: RequestStatus::Initiated,
            processing_log: Vec::new(),
            error_details: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// The running entry for `agent`, if any
    pub fn running_entry(&self, agent: Stage) -> Option<&AgentProcessingLog> {
        self.processing_log
            .iter()
            .rev()
            .find(|e| e.agent == agent && e.status == LogStatus::Running)
    }

    fn running_entry_mut(&mut self, agent: Stage) -> Option<&mut AgentProcessingLog> {
        self.processing_log
            .iter_mut()
            .rev()
            .find(|e| e.agent == agent && e.status == LogStatus::Running)
    }

    /// Any running entry, regardless of agent
    pub fn active_entry(&self) -> Option<&AgentProcessingLog> {
        self.processing_log
            .iter()
            .rev()
            .find(|e| e.status == LogStatus::Running)
    }

    /// Most recent entry for `agent`
    pub fn last_entry_for(&self, agent: Stage) -> Option<&AgentProcessingLog> {
        self.processing_log.iter().rev().find(|e| e.agent == agent)
    }

    pub fn running_count(&self) -> usize {
        self.processing_log
            .iter()
            .filter(|e| e.status == LogStatus::Running)
            .count()
    }

    /// Advance the status through the state machine
    pub fn apply(&mut self, event: PipelineEvent) -> Result<(), PipelineError> {
        self.status = self.status.apply(event)?;
        Ok(())
    }

    /// Append a running entry for `agent`
    pub fn start_stage(&mut self, agent: Stage, invocation_id: impl Into<String>) {
        self.processing_log.push(AgentProcessingLog {
            agent,
            start_time: Utc::now(),
            end_time: None,
            status: LogStatus::Running,
            data: Map::new(),
            error: None,
            invocation_id: invocation_id.into(),
        });
    }

    /// Mark the running entry for `agent` completed, merging `summary` into its data
    pub fn complete_stage(
        &mut self,
        agent: Stage,
        summary: Map<String, Value>,
    ) -> Result<(), PipelineError> {
        let status = self.status;
        let entry = self
            .running_entry_mut(agent)
            .ok_or(PipelineError::InvalidTransition {
                from: status,
                event: PipelineEvent::StageCompleted(agent),
            })?;
        entry.status = LogStatus::Completed;
        entry.end_time = Some(Utc::now());
        entry.data.extend(summary);
        Ok(())
    }

    /// Mark the running entry for `agent` failed; returns false if there was none
    pub fn fail_stage(&mut self, agent: Stage, error: &ProcessingError) -> bool {
        match self.running_entry_mut(agent) {
            Some(entry) => {
                entry.status = LogStatus::Failed;
                entry.end_time = Some(error.timestamp);
                entry.error = Some(error.clone());
                true
            }
            None => false,
        }
    }
}

/// TTL-bound store of itinerary requests
pub struct RequestStore {
    kv: TtlStore,
    ttl: Duration,
}

impl RequestStore {
    pub fn new(db: &PipelineDb, ttl: Duration) -> Self {
        Self {
            kv: TtlStore::new(db),
            ttl,
        }
    }

    pub fn key(request_id: &str) -> String {
        format!("itinerary_request:{}", request_id)
    }

    /// Persist a brand-new request; fails with `Conflict` if the id is taken
    pub fn create(&self, request: &mut ItineraryRequest) -> Result<(), PipelineError> {
        if !self
            .kv
            .insert_json(&Self::key(&request.id), &*request, self.ttl)?
        {
            return Err(PipelineError::Conflict(format!(
                "request {} already exists",
                request.id
            )));
        }
        request.revision = 1;
        Ok(())
    }

    pub fn load(&self, request_id: &str) -> Result<Option<ItineraryRequest>, PipelineError> {
        let loaded = self
            .kv
            .get_json::<ItineraryRequest>(&Self::key(request_id))?
            .map(|(mut request, revision)| {
                request.revision = revision;
                request
            });
        Ok(loaded)
    }

    /// Load or fail with `NotFound`
    pub fn require(&self, request_id: &str) -> Result<ItineraryRequest, PipelineError> {
        self.load(request_id)?
            .ok_or_else(|| PipelineError::NotFound(request_id.to_string()))
    }

    /// Full read-modify-write commit guarded by the loaded revision
    pub fn save(&self, request: &mut ItineraryRequest) -> Result<(), PipelineError> {
        request.updated_at = Utc::now();
        let swapped = self.kv.compare_and_swap_json(
            &Self::key(&request.id),
            request.revision,
            &*request,
            self.ttl,
        )?;

        match swapped {
            Some(revision) => {
                request.revision = revision;
                Ok(())
            }
            None => Err(PipelineError::Conflict(format!(
                "request {} changed since revision {}",
                request.id, request.revision
            ))),
        }
    }
}

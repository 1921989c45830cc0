//! # Pipeline Stages
//!
//! Defines the stages of the itinerary pipeline and the request status
//! state machine that sequences them.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::PipelineError;

/// Stage of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Destination research via content generation
    Research,
    /// Day-by-day activity curation via content generation
    Curation,
    /// Per-activity place verification
    Validation,
    /// Final itinerary assembly and archival
    Response,
}

impl Stage {
    /// All stages in pipeline order
    pub const ALL: [Stage; 4] = [
        Stage::Research,
        Stage::Curation,
        Stage::Validation,
        Stage::Response,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Research => "research",
            Stage::Curation => "curation",
            Stage::Validation => "validation",
            Stage::Response => "response",
        }
    }

    /// Parse a stage name as it appears in endpoint paths
    pub fn parse(name: &str) -> Option<Stage> {
        match name {
            "research" => Some(Stage::Research),
            "curation" => Some(Stage::Curation),
            "validation" => Some(Stage::Validation),
            "response" => Some(Stage::Response),
            _ => None,
        }
    }

    /// The stage that runs after this one, `None` for the last stage
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Research => Some(Stage::Curation),
            Stage::Curation => Some(Stage::Validation),
            Stage::Validation => Some(Stage::Response),
            Stage::Response => None,
        }
    }

    /// The stage whose cached result this stage consumes
    pub fn upstream(&self) -> Option<Stage> {
        match self {
            Stage::Research => None,
            Stage::Curation => Some(Stage::Research),
            Stage::Validation => Some(Stage::Curation),
            Stage::Response => Some(Stage::Validation),
        }
    }

    pub fn in_progress(&self) -> RequestStatus {
        match self {
            Stage::Research => RequestStatus::ResearchInProgress,
            Stage::Curation => RequestStatus::CurationInProgress,
            Stage::Validation => RequestStatus::ValidationInProgress,
            Stage::Response => RequestStatus::ResponseInProgress,
        }
    }

    pub fn completed(&self) -> RequestStatus {
        match self {
            Stage::Research => RequestStatus::ResearchCompleted,
            Stage::Curation => RequestStatus::CurationCompleted,
            Stage::Validation => RequestStatus::ValidationCompleted,
            Stage::Response => RequestStatus::ResponseCompleted,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of an itinerary request
///
/// The `*-completed` values are reported in stage envelopes; a persisted
/// request moves from one stage's in-progress value straight to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestStatus {
    Initiated,
    ResearchInProgress,
    ResearchCompleted,
    CurationInProgress,
    CurationCompleted,
    ValidationInProgress,
    ValidationCompleted,
    ResponseInProgress,
    ResponseCompleted,
    Completed,
    Failed,
}

/// Something that happened to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "stage", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// The orchestrator started the pipeline
    Begin,
    /// A stage finished its work and persisted its result
    StageCompleted(Stage),
    /// A stage (or its handoff) failed
    StageFailed(Stage),
    /// The processing budget was exceeded
    TimedOut,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Initiated => "initiated",
            RequestStatus::ResearchInProgress => "research-in-progress",
            RequestStatus::ResearchCompleted => "research-completed",
            RequestStatus::CurationInProgress => "curation-in-progress",
            RequestStatus::CurationCompleted => "curation-completed",
            RequestStatus::ValidationInProgress => "validation-in-progress",
            RequestStatus::ValidationCompleted => "validation-completed",
            RequestStatus::ResponseInProgress => "response-in-progress",
            RequestStatus::ResponseCompleted => "response-completed",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }

    /// Check if the request has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }

    /// The stage this status belongs to, if any
    pub fn active_stage(&self) -> Option<Stage> {
        match self {
            RequestStatus::ResearchInProgress | RequestStatus::ResearchCompleted => {
                Some(Stage::Research)
            }
            RequestStatus::CurationInProgress | RequestStatus::CurationCompleted => {
                Some(Stage::Curation)
            }
            RequestStatus::ValidationInProgress | RequestStatus::ValidationCompleted => {
                Some(Stage::Validation)
            }
            RequestStatus::ResponseInProgress | RequestStatus::ResponseCompleted => {
                Some(Stage::Response)
            }
            RequestStatus::Initiated | RequestStatus::Completed | RequestStatus::Failed => None,
        }
    }

    /// Apply an event, returning the resulting status
    ///
    /// Every (status, event) pair is handled explicitly; anything that is not
    /// a legal transition is rejected rather than silently ignored.
    pub fn apply(self, event: PipelineEvent) -> Result<RequestStatus, PipelineError> {
        let rejected = || PipelineError::InvalidTransition { from: self, event };

        match self {
            RequestStatus::Completed | RequestStatus::Failed => Err(rejected()),
            RequestStatus::Initiated => match event {
                PipelineEvent::Begin => Ok(RequestStatus::ResearchInProgress),
                PipelineEvent::StageFailed(_) | PipelineEvent::TimedOut => {
                    Ok(RequestStatus::Failed)
                }
                PipelineEvent::StageCompleted(_) => Err(rejected()),
            },
            RequestStatus::ResearchInProgress
            | RequestStatus::ResearchCompleted
            | RequestStatus::CurationInProgress
            | RequestStatus::CurationCompleted
            | RequestStatus::ValidationInProgress
            | RequestStatus::ValidationCompleted
            | RequestStatus::ResponseInProgress
            | RequestStatus::ResponseCompleted => match event {
                PipelineEvent::Begin => Err(rejected()),
                PipelineEvent::StageCompleted(stage) if self.active_stage() == Some(stage) => {
                    Ok(stage
                        .next()
                        .map_or(RequestStatus::Completed, |next| next.in_progress()))
                }
                PipelineEvent::StageCompleted(_) => Err(rejected()),
                PipelineEvent::StageFailed(_) | PipelineEvent::TimedOut => {
                    Ok(RequestStatus::Failed)
                }
            },
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

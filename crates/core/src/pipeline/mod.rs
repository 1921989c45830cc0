//! # Itinerary Pipeline
//!
//! Four stages run strictly in order for each request:
//!
//! ```text
//! Orchestrator ─▶ research ─▶ curation ─▶ validation ─▶ response ─▶ completed
//!                    │            │            │            │
//!                    └────────────┴─────┬──────┴────────────┘
//!                                       ▼
//!                  FailureHandler ◀── TimeoutMonitor
//!                       │
//!                       ▼
//!                     failed
//! ```
//!
//! Each stage is an independent invocation. The only state carried between
//! them is what the stores hold, and every request write is compare-and-swap.

pub mod agent;
pub mod auth;
pub mod context;
pub mod error;
pub mod failure;
pub mod monitor;
pub mod orchestrator;
pub mod stage;
pub mod transport;
pub mod wire;

#[cfg(test)]
mod tests;

pub use agent::{Collaborators, StageAgent, StageAgents, StageOutput, StageWorker};
pub use auth::{InternalAuth, INTERNAL_SECRET_HEADER};
pub use context::PipelineContext;
pub use error::PipelineError;
pub use failure::{FailureDisposition, FailureHandler};
pub use monitor::{SweepReport, TimeoutCheck, TimeoutMonitor};
pub use orchestrator::Orchestrator;
pub use stage::{PipelineEvent, RequestStatus, Stage};
pub use transport::{
    spawn_stage_dispatcher, ChannelTransport, Dispatch, HttpStageTransport, StageTransport,
};
pub use wire::{Envelope, ErrorBody, StageInvocation, StageOutcome};

//! # Itinerary Core
//!
//! The orchestration pipeline behind itinerary generation: a durable state
//! machine that carries one request through four stages (research, curation,
//! validation, response), hands control from stage to stage, detects stalled
//! processing and records failures.
//!
//! ## Architecture
//!
//! - `state/` - SQLite-backed TTL stores (requests, stage results, timeout records) and the itinerary archive
//! - `pipeline/` - stage state machine, stage agents, orchestrator, failure handler, timeout monitor, transport
//! - `skills/` - per-stage work delegated to external collaborators (content generation, place verification)
//! - `models/` - LLM provider configuration for the content-generation collaborator
//! - `config` - pipeline configuration (file + environment)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use itinerary_core::pipeline::{Orchestrator, PipelineContext};
//!
//! let orchestrator = Orchestrator::new(ctx.clone());
//! let request = orchestrator.submit("user-1", requirements)?;
//! orchestrator.begin(&request.id).await?;
//! ```

pub mod config;
pub mod models;
pub mod pipeline;
pub mod skills;
pub mod state;

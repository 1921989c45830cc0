//! # Pipeline State
//!
//! Everything the pipeline persists between stage invocations.

pub mod archive;
pub mod db;
pub mod kv;
pub mod request_store;
pub mod stage_cache;
pub mod timeout_store;

pub use db::PipelineDb;

pub use archive::{ItineraryArchive, SqliteItineraryArchive};
pub use kv::TtlStore;
pub use request_store::{
    new_invocation_id, AgentProcessingLog, ItineraryRequest, LogStatus, ProcessingError,
    RequestStore,
};
pub use stage_cache::StageResultCache;
pub use timeout_store::{TimeoutRecord, TimeoutStore};

//! Shared handles every pipeline component works from.

use std::sync::Arc;

use super::failure::FailureHandler;
use super::transport::StageTransport;
use crate::config::PipelineConfig;
use crate::state::{PipelineDb, RequestStore, StageResultCache, TimeoutStore};

#[derive(Clone)]
pub struct PipelineContext {
    pub requests: Arc<RequestStore>,
    pub results: Arc<StageResultCache>,
    pub timeouts: Arc<TimeoutStore>,
    pub failures: Arc<FailureHandler>,
    pub transport: Arc<dyn StageTransport>,
    pub config: Arc<PipelineConfig>,
}

impl PipelineContext {
    pub fn new(
        db: &PipelineDb,
        config: PipelineConfig,
        transport: Arc<dyn StageTransport>,
    ) -> Self {
        let requests = Arc::new(RequestStore::new(db, config.request_ttl()));
        Self {
            results: Arc::new(StageResultCache::new(db, config.result_ttl())),
            timeouts: Arc::new(TimeoutStore::new(db)),
            failures: Arc::new(FailureHandler::new(Arc::clone(&requests))),
            requests,
            transport,
            config: Arc::new(config),
        }
    }
}

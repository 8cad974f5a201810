//! Application state for the query service.

use std::sync::Arc;

use common::config::AppConfig;

use crate::connectors::ConnectorRegistry;
use crate::llm::OpenAiClient;
use crate::service::QueryPipeline;

/// Application state shared across handlers.
///
/// Holds no per-request data; connections are opened and closed inside each
/// pipeline run.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub pipeline: Arc<QueryPipeline>,
}

impl AppState {
    /// Wires the built-in connectors and the configured completion provider.
    pub fn new(config: AppConfig) -> Self {
        let llm = Arc::new(OpenAiClient::new(config.llm.clone()));
        let pipeline = QueryPipeline::new(ConnectorRegistry::with_defaults(), llm, config.schema);
        Self::with_pipeline(config, pipeline)
    }

    pub fn with_pipeline(config: AppConfig, pipeline: QueryPipeline) -> Self {
        Self {
            config,
            pipeline: Arc::new(pipeline),
        }
    }
}

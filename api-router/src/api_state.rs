use std::sync::Arc;

use common::storage::metadata::MetadataStore;
use common::utils::config::AppConfig;
use ingestion_pipeline::Indexer;
use retrieval_pipeline::QueryOrchestrator;
use vector_store::VectorStore;

/// Shared handler state. The binary constructs every component once and
/// hands clones to the router; all fields are cheap to clone.
#[derive(Clone)]
pub struct ApiState {
    pub config: AppConfig,
    pub metadata: MetadataStore,
    pub vector_store: Arc<VectorStore>,
    pub indexer: Arc<Indexer>,
    pub orchestrator: Arc<QueryOrchestrator>,
}

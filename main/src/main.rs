use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::{
    storage::{metadata::MetadataStore, store::StorageManager},
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use ingestion_pipeline::Indexer;
use retrieval_pipeline::{AnswerGenerator, OpenAiGenerator, QueryOrchestrator};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vector_store::VectorStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedding_provider = Arc::new(
        EmbeddingProvider::from_config(&config, Some(Arc::clone(&openai_client))).await?,
    );
    info!(
        backend = embedding_provider.backend_label(),
        dimension = embedding_provider.dimension(),
        "Embedding provider ready"
    );

    let vector_store = Arc::new(VectorStore::from_config(&config, embedding_provider).await?);
    info!(
        backend = vector_store.backend_label(),
        "Vector store initialized"
    );

    let metadata = MetadataStore::from_config(&config).await?;
    info!(
        backend = metadata.backend_label(),
        "Metadata store initialized"
    );

    let storage = StorageManager::new(&config).await?;

    let indexer = Arc::new(Indexer::new(
        Arc::clone(&vector_store),
        metadata.clone(),
        storage,
        &config,
    )?);

    let generator: Arc<dyn AnswerGenerator> = Arc::new(OpenAiGenerator::from_config(
        &config,
        Arc::clone(&openai_client),
    ));
    let orchestrator = Arc::new(QueryOrchestrator::new(
        Arc::clone(&vector_store),
        metadata.clone(),
        generator,
    ));

    let api_state = ApiState {
        config: config.clone(),
        metadata,
        vector_store,
        indexer,
        orchestrator,
    };

    // Create Axum router
    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .with_state(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

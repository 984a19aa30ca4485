use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("Vector store not initialized: {0}")]
    NotInitialized(String),
    #[error("Backend operation failed: {0}")]
    BackendOperation(String),
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Sqlite error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("Object storage error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Stable machine-readable label used in API error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::NotInitialized(_) => "not_initialized",
            Self::BackendOperation(_) => "backend_error",
            _ => "internal_error",
        }
    }
}

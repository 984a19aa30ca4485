use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use super::embedding::EmbeddingBackend;

#[derive(Clone, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
    Memory,
    Azure,
}

#[derive(Clone, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackendKind {
    #[default]
    Embedded,
    Remote,
}

/// Application configuration, deserialized once at startup and passed by
/// reference into component constructors.
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_upload_max_body_bytes")]
    pub upload_max_body_bytes: usize,

    // Blob storage
    #[serde(default)]
    pub storage: StorageKind,
    #[serde(default)]
    pub azure_storage_account: String,
    #[serde(default)]
    pub azure_storage_access_key: String,
    #[serde(default = "default_blob_container")]
    pub azure_storage_container: String,

    // Metadata store. Presence of an address selects SurrealDB, otherwise a
    // local sqlite file under `data_dir` is used.
    #[serde(default)]
    pub surrealdb_address: Option<String>,
    #[serde(default = "default_surreal_root")]
    pub surrealdb_username: String,
    #[serde(default = "default_surreal_root")]
    pub surrealdb_password: String,
    #[serde(default = "default_surreal_ns")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_surreal_ns")]
    pub surrealdb_database: String,

    // Vector store backend
    #[serde(default)]
    pub vector_backend: VectorBackendKind,
    #[serde(default)]
    pub search_endpoint: Option<String>,
    #[serde(default)]
    pub search_api_key: Option<String>,
    #[serde(default = "default_search_index")]
    pub search_index_name: String,

    // Embeddings
    #[serde(default)]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default)]
    pub fastembed_model: Option<String>,

    // Generation
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    // Chunking
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    // Retrieval
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            http_port: default_http_port(),
            upload_max_body_bytes: default_upload_max_body_bytes(),
            storage: StorageKind::default(),
            azure_storage_account: String::new(),
            azure_storage_access_key: String::new(),
            azure_storage_container: default_blob_container(),
            surrealdb_address: None,
            surrealdb_username: default_surreal_root(),
            surrealdb_password: default_surreal_root(),
            surrealdb_namespace: default_surreal_ns(),
            surrealdb_database: default_surreal_ns(),
            vector_backend: VectorBackendKind::default(),
            search_endpoint: None,
            search_api_key: None,
            search_index_name: default_search_index(),
            embedding_backend: EmbeddingBackend::default(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            fastembed_model: None,
            openai_api_key: String::new(),
            openai_base_url: default_base_url(),
            chat_model: default_chat_model(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            default_top_k: default_top_k(),
            fetch_k: default_fetch_k(),
        }
    }
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_http_port() -> u16 {
    8000
}

// 50 MiB.
fn default_upload_max_body_bytes() -> usize {
    52_428_800
}

fn default_blob_container() -> String {
    "documents".to_string()
}

fn default_surreal_root() -> String {
    "root".to_string()
}

fn default_surreal_ns() -> String {
    "arkiv".to_string()
}

fn default_search_index() -> String {
    "rag-index".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_top_k() -> usize {
    5
}

fn default_fetch_k() -> usize {
    20
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::utils::ids::chunk_id;

/// The atomic unit of retrieval. Chunks are written once at index time and
/// never mutated; the embedding lives in the vector backend, not here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub chunk_index: usize,
    #[serde(default)]
    pub page: Option<u32>,
    pub source: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Chunk {
    /// Builds a chunk with its id derived from `(document_id, index)`, so the
    /// same input always produces the same id.
    pub fn new(document_id: &str, chunk_index: usize, content: String, source: String) -> Self {
        Self {
            chunk_id: chunk_id(document_id, chunk_index),
            document_id: document_id.to_string(),
            content,
            chunk_index,
            page: None,
            source,
            metadata: HashMap::new(),
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

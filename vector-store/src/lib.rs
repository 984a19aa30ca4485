pub mod embedded;
pub mod filter;
pub mod mmr;
pub mod remote;
pub mod store;

use common::storage::types::chunk::Chunk;

pub use store::{SearchMode, VectorStore};

/// A chunk paired with its backend-reported relevance score. The score is
/// absent when the backend does not report one; downstream reranking treats
/// that as an identity transform.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: Option<f32>,
}

/// One entry as written to a backend: the entry id is the retrieval key and
/// may differ from `chunk.chunk_id` when the caller supplied explicit ids.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A search candidate including its stored vector, so diversity selection can
/// compare candidates without re-embedding them.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    pub score: Option<f32>,
}

impl VectorEntry {
    pub fn into_hit(self) -> SearchHit {
        SearchHit {
            chunk: self.chunk,
            score: self.score,
        }
    }
}

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use common::error::AppError;
use tracing::{debug, instrument};
use vector_store::{SearchHit, SearchMode, VectorStore};

/// Over-fetch multiplier applied to `top_k` when pulling the candidate pool.
const CANDIDATE_MULTIPLIER: usize = 2;

/// Query-side retrieval: pulls a diversity-selected candidate pool from the
/// vector store and reranks it down to the requested count.
pub struct Retriever {
    vector_store: Arc<VectorStore>,
}

impl Retriever {
    pub fn new(vector_store: Arc<VectorStore>) -> Self {
        Self { vector_store }
    }

    /// Fetches `2 × top_k` candidates through the diversity-aware search mode
    /// so near-duplicate chunks do not crowd the pool.
    #[instrument(skip_all, fields(top_k))]
    pub async fn fetch_candidates(
        &self,
        query_text: &str,
        top_k: usize,
        filter: Option<&HashMap<String, String>>,
    ) -> Result<Vec<SearchHit>, AppError> {
        let fetch = top_k.saturating_mul(CANDIDATE_MULTIPLIER);
        let candidates = self
            .vector_store
            .search_with_mode(query_text, fetch, filter, SearchMode::Diverse)
            .await?;
        debug!(
            requested = fetch,
            returned = candidates.len(),
            "fetched candidate pool"
        );
        Ok(candidates)
    }

    /// Candidate fetch plus rerank in one call.
    pub async fn retrieve(
        &self,
        query_text: &str,
        top_k: usize,
        filter: Option<&HashMap<String, String>>,
    ) -> Result<Vec<SearchHit>, AppError> {
        let candidates = self.fetch_candidates(query_text, top_k, filter).await?;
        Ok(rerank(candidates, top_k))
    }
}

/// Stable sort by backend score descending, then truncate to `top_k`. Ties
/// keep retrieval order. When any hit lacks a score the sort is skipped
/// entirely and the diversity-selected order stands.
pub fn rerank(mut hits: Vec<SearchHit>, top_k: usize) -> Vec<SearchHit> {
    if hits.iter().all(|hit| hit.score.is_some()) {
        hits.sort_by(|a, b| {
            let left = a.score.unwrap_or_default();
            let right = b.score.unwrap_or_default();
            right.partial_cmp(&left).unwrap_or(Ordering::Equal)
        });
    }
    hits.truncate(top_k);
    hits
}

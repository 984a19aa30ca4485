use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use common::error::AppError;
use common::storage::types::chunk::Chunk;
use common::utils::config::{AppConfig, VectorBackendKind};
use common::utils::embedding::EmbeddingProvider;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::embedded::EmbeddedIndex;
use crate::mmr;
use crate::remote::RemoteIndex;
use crate::{SearchHit, VectorEntry, VectorRecord};

/// Relevance/diversity trade-off used by [`SearchMode::Diverse`].
pub const MMR_LAMBDA: f32 = 0.5;

const VECTOR_DB_FILE: &str = "vectors.db";
const DIMENSION_PROBE_TEXT: &str = "dimension probe";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Plain nearest-neighbor order.
    #[default]
    Similarity,
    /// Maximal marginal relevance over an over-fetched candidate pool.
    Diverse,
}

enum BackendInner {
    Embedded(EmbeddedIndex),
    Remote(RemoteIndex),
}

/// Embedding-aware facade over the configured vector backend. Holds the
/// embedder so callers pass text, not vectors.
pub struct VectorStore {
    embedder: Arc<EmbeddingProvider>,
    backend: BackendInner,
    fetch_k: usize,
    probed_dimension: OnceCell<usize>,
}

impl VectorStore {
    pub async fn from_config(
        config: &AppConfig,
        embedder: Arc<EmbeddingProvider>,
    ) -> Result<Self, AppError> {
        let backend = match config.vector_backend {
            VectorBackendKind::Embedded => {
                tokio::fs::create_dir_all(&config.data_dir).await?;
                let path = Path::new(&config.data_dir).join(VECTOR_DB_FILE);
                info!(path = %path.display(), "opening embedded vector index");
                BackendInner::Embedded(EmbeddedIndex::open(path).await?)
            }
            VectorBackendKind::Remote => {
                info!(index = %config.search_index_name, "connecting to remote search index");
                BackendInner::Remote(RemoteIndex::new(config)?)
            }
        };
        Ok(Self {
            embedder,
            backend,
            fetch_k: config.fetch_k,
            probed_dimension: OnceCell::new(),
        })
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub async fn memory(embedder: Arc<EmbeddingProvider>) -> Result<Self, AppError> {
        Ok(Self {
            embedder,
            backend: BackendInner::Embedded(EmbeddedIndex::open_in_memory().await?),
            fetch_k: AppConfig::default().fetch_k,
            probed_dimension: OnceCell::new(),
        })
    }

    pub fn backend_label(&self) -> &'static str {
        match self.backend {
            BackendInner::Embedded(_) => "embedded",
            BackendInner::Remote(_) => "remote",
        }
    }

    pub fn embedder(&self) -> &Arc<EmbeddingProvider> {
        &self.embedder
    }

    /// Embedding dimension, probed once with a sentinel string. The probe is
    /// authoritative over the configured value since index schemas depend on
    /// the size vectors actually come back with.
    async fn dimension(&self) -> Result<usize, AppError> {
        let dimension = self
            .probed_dimension
            .get_or_try_init(|| async {
                let probe = self.embedder.embed(DIMENSION_PROBE_TEXT).await?;
                if probe.is_empty() {
                    return Err(AppError::BackendOperation(
                        "embedding provider returned an empty probe vector".to_string(),
                    ));
                }
                let configured = self.embedder.dimension();
                if configured != probe.len() {
                    warn!(
                        configured,
                        probed = probe.len(),
                        "embedding dimension differs from configuration, using probed value"
                    );
                }
                Ok::<usize, AppError>(probe.len())
            })
            .await?;
        Ok(*dimension)
    }

    /// Embeds and stores `chunks`, returning the ids they were stored under
    /// in input order. When `ids` is given it must match `chunks` in length;
    /// otherwise fresh UUIDs are generated.
    pub async fn add(
        &self,
        chunks: Vec<Chunk>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>, AppError> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let ids = match ids {
            Some(ids) => {
                if ids.len() != chunks.len() {
                    return Err(AppError::Validation(format!(
                        "got {} ids for {} chunks",
                        ids.len(),
                        chunks.len()
                    )));
                }
                ids
            }
            None => chunks.iter().map(|_| Uuid::new_v4().to_string()).collect(),
        };

        let dimension = self.dimension().await?;
        let contents: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        let vectors = self.embedder.embed_batch(contents).await?;
        if vectors.len() != chunks.len() {
            return Err(AppError::BackendOperation(format!(
                "embedding batch returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
        if let Some(vector) = vectors.iter().find(|vector| vector.len() != dimension) {
            return Err(AppError::BackendOperation(format!(
                "embedding of size {} does not match index dimension {dimension}",
                vector.len()
            )));
        }

        let records: Vec<VectorRecord> = ids
            .iter()
            .cloned()
            .zip(chunks.into_iter().zip(vectors))
            .map(|(id, (chunk, vector))| VectorRecord { id, chunk, vector })
            .collect();

        debug!(
            count = records.len(),
            backend = self.backend_label(),
            "storing chunk vectors"
        );
        match &self.backend {
            BackendInner::Embedded(index) => index.add(records).await?,
            BackendInner::Remote(index) => index.add(&records, dimension).await?,
        }
        Ok(ids)
    }

    pub async fn search(
        &self,
        query_text: &str,
        k: usize,
        filter: Option<&HashMap<String, String>>,
    ) -> Result<Vec<SearchHit>, AppError> {
        self.search_with_mode(query_text, k, filter, SearchMode::Similarity)
            .await
    }

    pub async fn search_with_mode(
        &self,
        query_text: &str,
        k: usize,
        filter: Option<&HashMap<String, String>>,
        mode: SearchMode,
    ) -> Result<Vec<SearchHit>, AppError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vector = self.embedder.embed(query_text).await?;
        let hits = match mode {
            SearchMode::Similarity => {
                let entries = self.backend_search(&query_vector, k, filter).await?;
                entries.into_iter().map(VectorEntry::into_hit).collect()
            }
            SearchMode::Diverse => {
                let pool = self.fetch_k.max(k);
                let candidates = self.backend_search(&query_vector, pool, filter).await?;
                let selected = mmr::select_diverse(&query_vector, candidates, k, MMR_LAMBDA);
                selected.into_iter().map(VectorEntry::into_hit).collect()
            }
        };
        Ok(hits)
    }

    async fn backend_search(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: Option<&HashMap<String, String>>,
    ) -> Result<Vec<VectorEntry>, AppError> {
        match &self.backend {
            BackendInner::Embedded(index) => index.search(query_vector, k, filter).await,
            BackendInner::Remote(index) => index.search(query_vector, k, filter).await,
        }
    }

    pub async fn delete(&self, ids: &[String]) -> Result<(), AppError> {
        match &self.backend {
            BackendInner::Embedded(index) => index.delete(ids).await,
            BackendInner::Remote(index) => index.delete(ids).await,
        }
    }

    pub async fn is_ready(&self) -> bool {
        match &self.backend {
            BackendInner::Embedded(index) => index.is_ready().await,
            BackendInner::Remote(index) => index.is_ready().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashed_store_embedder() -> Arc<EmbeddingProvider> {
        Arc::new(EmbeddingProvider::new_hashed(512).unwrap())
    }

    fn chunk(document_id: &str, index: usize, content: &str) -> Chunk {
        Chunk::new(document_id, index, content.to_string(), "test.txt".to_string())
    }

    #[tokio::test]
    async fn empty_add_is_a_no_op() {
        let store = VectorStore::memory(hashed_store_embedder()).await.unwrap();
        let ids = store.add(Vec::new(), None).await.unwrap();
        assert!(ids.is_empty());
        assert!(!store.is_ready().await);
    }

    #[tokio::test]
    async fn synthesized_ids_are_uuids_and_retrievable() {
        let store = VectorStore::memory(hashed_store_embedder()).await.unwrap();
        let ids = store
            .add(
                vec![
                    chunk("doc-1", 0, "alpha beta gamma"),
                    chunk("doc-1", 1, "delta epsilon"),
                ],
                None,
            )
            .await
            .unwrap();

        assert_eq!(ids.len(), 2);
        for id in &ids {
            assert!(Uuid::parse_str(id).is_ok());
        }
        assert_ne!(ids.first(), ids.get(1));

        let hits = store.search("alpha beta gamma", 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(
            hits.first().map(|hit| hit.chunk.content.as_str()),
            Some("alpha beta gamma")
        );
    }

    #[tokio::test]
    async fn caller_supplied_ids_are_kept() {
        let store = VectorStore::memory(hashed_store_embedder()).await.unwrap();
        let wanted = vec!["doc-1_chunk_0".to_string()];
        let ids = store
            .add(vec![chunk("doc-1", 0, "alpha")], Some(wanted.clone()))
            .await
            .unwrap();
        assert_eq!(ids, wanted);

        store.delete(&ids).await.unwrap();
        let hits = store.search("alpha", 5, None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn mismatched_id_count_is_rejected() {
        let store = VectorStore::memory(hashed_store_embedder()).await.unwrap();
        let result = store
            .add(
                vec![chunk("doc-1", 0, "alpha"), chunk("doc-1", 1, "beta")],
                Some(vec!["only-one".to_string()]),
            )
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(!store.is_ready().await);
    }

    #[tokio::test]
    async fn searching_an_empty_store_reports_not_initialized() {
        let store = VectorStore::memory(hashed_store_embedder()).await.unwrap();
        let result = store.search("anything", 5, None).await;
        assert!(matches!(result, Err(AppError::NotInitialized(_))));
    }

    #[tokio::test]
    async fn diverse_mode_skips_near_duplicates() {
        let store = VectorStore::memory(hashed_store_embedder()).await.unwrap();
        store
            .add(
                vec![
                    chunk("doc-1", 0, "alpha beta gamma"),
                    chunk("doc-1", 1, "alpha beta gamma"),
                    chunk("doc-2", 0, "delta epsilon zeta eta theta"),
                ],
                None,
            )
            .await
            .unwrap();

        let similar = store
            .search("alpha beta gamma delta", 2, None)
            .await
            .unwrap();
        let similar_contents: Vec<&str> =
            similar.iter().map(|hit| hit.chunk.content.as_str()).collect();
        assert_eq!(
            similar_contents,
            vec!["alpha beta gamma", "alpha beta gamma"]
        );

        let diverse = store
            .search_with_mode("alpha beta gamma delta", 2, None, SearchMode::Diverse)
            .await
            .unwrap();
        let diverse_contents: Vec<&str> =
            diverse.iter().map(|hit| hit.chunk.content.as_str()).collect();
        assert_eq!(
            diverse_contents,
            vec!["alpha beta gamma", "delta epsilon zeta eta theta"]
        );
    }

    #[tokio::test]
    async fn filters_pass_through_to_the_backend() {
        let store = VectorStore::memory(hashed_store_embedder()).await.unwrap();
        store
            .add(
                vec![
                    chunk("doc-1", 0, "alpha beta"),
                    chunk("doc-2", 0, "alpha beta"),
                ],
                None,
            )
            .await
            .unwrap();

        let filter = HashMap::from([("document_id".to_string(), "doc-2".to_string())]);
        let hits = store.search("alpha beta", 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(
            hits.first().map(|hit| hit.chunk.document_id.as_str()),
            Some("doc-2")
        );
    }
}

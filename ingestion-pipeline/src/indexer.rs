use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use common::error::AppError;
use common::storage::metadata::MetadataStore;
use common::storage::store::StorageManager;
use common::storage::types::chunk::Chunk;
use common::storage::types::document::DocumentRecord;
use common::utils::config::AppConfig;
use common::utils::ids::{chunk_id, document_id_from_bytes, document_id_from_path};
use tracing::{info, instrument, warn};
use vector_store::VectorStore;

use crate::chunker::Chunker;
use crate::loader::{self, LoadedUnit};

/// Drives a document through load, chunk, embed-and-store, and blob upload,
/// recording status transitions on the document record as it goes.
pub struct Indexer {
    vector_store: Arc<VectorStore>,
    metadata: MetadataStore,
    storage: StorageManager,
    chunker: Chunker,
}

impl Indexer {
    pub fn new(
        vector_store: Arc<VectorStore>,
        metadata: MetadataStore,
        storage: StorageManager,
        config: &AppConfig,
    ) -> Result<Self, AppError> {
        Ok(Self {
            vector_store,
            metadata,
            storage,
            chunker: Chunker::from_config(config)?,
        })
    }

    /// Indexes one file. The returned record is `indexed` on success; any
    /// failure marks the record `failed` with the captured message and
    /// re-raises. Vector writes that happened before a failure are not rolled
    /// back, so indexing is at-least-once and re-running it converges.
    #[instrument(skip_all, fields(path = %file_path.display()))]
    pub async fn index(
        &self,
        file_path: &Path,
        document_id: Option<String>,
    ) -> Result<DocumentRecord, AppError> {
        let bytes = tokio::fs::read(file_path).await.ok();
        let document_id =
            document_id.unwrap_or_else(|| stable_document_id(file_path, bytes.as_deref()));

        let filename = file_path.file_name().map_or_else(
            || file_path.display().to_string(),
            |name| name.to_string_lossy().into_owned(),
        );
        let file_type = file_path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let file_size = bytes
            .as_ref()
            .map_or(0, |data| u64::try_from(data.len()).unwrap_or_default());

        let mut record = DocumentRecord::new(document_id, filename, file_type, file_size);
        self.metadata.save_document(&record).await?;

        record.mark_processing();
        self.metadata.save_document(&record).await?;

        match self.run(&record, file_path, bytes).await {
            Ok((chunk_count, blob_url)) => {
                record.mark_indexed(chunk_count, blob_url);
                self.metadata.save_document(&record).await?;
                info!(document_id = %record.id, chunks = chunk_count, "document indexed");
                Ok(record)
            }
            Err(err) => {
                record.mark_failed(err.to_string());
                if let Err(save_err) = self.metadata.save_document(&record).await {
                    warn!(
                        document_id = %record.id,
                        error = %save_err,
                        "failed to record indexing failure"
                    );
                }
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        record: &DocumentRecord,
        file_path: &Path,
        bytes: Option<Vec<u8>>,
    ) -> Result<(usize, Option<String>), AppError> {
        // Re-reading surfaces the IO failure that made the byte-derived id
        // unavailable in the first place.
        let bytes = match bytes {
            Some(bytes) => Bytes::from(bytes),
            None => Bytes::from(tokio::fs::read(file_path).await?),
        };

        let units = loader::load(file_path).await?;
        let chunks = self.build_chunks(&record.id, &record.filename, &units);
        if chunks.is_empty() {
            return Err(AppError::Validation(format!(
                "no indexable text in '{}'",
                record.filename
            )));
        }

        let chunk_count = chunks.len();
        let ids: Vec<String> = chunks.iter().map(|chunk| chunk.chunk_id.clone()).collect();
        self.vector_store.add(chunks, Some(ids)).await?;

        let location = StorageManager::document_location(&record.id, &record.filename);
        self.storage.put(&location, bytes).await?;

        Ok((chunk_count, Some(location)))
    }

    /// Chunk indices run 0-based across the whole document in unit order, so
    /// ids stay deterministic for a given input.
    fn build_chunks(&self, document_id: &str, source: &str, units: &[LoadedUnit]) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = Vec::new();
        for unit in units {
            for piece in self.chunker.split(&unit.text) {
                let mut chunk = Chunk::new(document_id, chunks.len(), piece, source.to_string());
                if let Some(page) = unit.page {
                    chunk = chunk.with_page(page);
                }
                chunks.push(chunk);
            }
        }
        chunks
    }

    /// Removes a document everywhere it lives: vector entries (ids rebuilt
    /// from the stored chunk count), the uploaded blob, and the metadata
    /// record.
    #[instrument(skip_all, fields(document_id))]
    pub async fn delete_document(&self, document_id: &str) -> Result<(), AppError> {
        let record = self
            .metadata
            .get_document(document_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("document '{document_id}'")))?;

        let chunk_ids: Vec<String> = (0..record.chunk_count)
            .map(|index| chunk_id(document_id, index))
            .collect();
        if !chunk_ids.is_empty() {
            self.vector_store.delete(&chunk_ids).await?;
        }

        self.storage
            .delete_prefix(&StorageManager::document_prefix(document_id))
            .await?;
        self.metadata.delete_document(document_id).await?;

        info!(document_id, chunks = record.chunk_count, "document deleted");
        Ok(())
    }
}

/// A provided id always wins; otherwise the id derives from the file bytes,
/// or from the path when the file could not be read.
fn stable_document_id(file_path: &Path, bytes: Option<&[u8]>) -> String {
    match bytes {
        Some(bytes) => document_id_from_bytes(bytes),
        None => document_id_from_path(&file_path.to_string_lossy()),
    }
}

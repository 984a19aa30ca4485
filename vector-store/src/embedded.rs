use std::collections::HashMap;
use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use common::error::AppError;
use common::storage::types::chunk::Chunk;
use tokio::sync::RwLock;
use tokio_rusqlite::{Connection, OptionalExtension, ToSql, ffi};
use tracing::{debug, info};

use crate::filter;
use crate::{VectorEntry, VectorRecord};

const CREATE_TABLES_SQL: &str = "
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL,
    content TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    page INTEGER,
    source TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
CREATE TABLE IF NOT EXISTS chunk_embeddings (
    id TEXT PRIMARY KEY,
    embedding TEXT NOT NULL
);
";

/// File-backed vector index on sqlite with the sqlite-vec extension.
///
/// Tables are created lazily on the first write. Until then the index reports
/// itself as uninitialized and searches fail with [`AppError::NotInitialized`].
pub struct EmbeddedIndex {
    conn: Connection,
    initialized: RwLock<bool>,
}

fn register_vector_extension() {
    static INIT: Once = Once::new();
    INIT.call_once(|| unsafe {
        type SqliteExtensionInit = unsafe extern "C" fn(
            *mut ffi::sqlite3,
            *mut *mut c_char,
            *const ffi::sqlite3_api_routines,
        ) -> i32;

        let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
        let init_fn: SqliteExtensionInit =
            transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
        let rc = ffi::sqlite3_auto_extension(Some(init_fn));
        if rc != 0 {
            tracing::error!(code = rc, "failed to register sqlite-vec extension");
        }
    });
}

impl EmbeddedIndex {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        register_vector_extension();
        let conn = Connection::open(path.as_ref().to_path_buf()).await?;
        Self::from_connection(conn).await
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub async fn open_in_memory() -> Result<Self, AppError> {
        register_vector_extension();
        let conn = Connection::open_in_memory().await?;
        Self::from_connection(conn).await
    }

    async fn from_connection(conn: Connection) -> Result<Self, AppError> {
        let version: String = conn
            .call(|conn| {
                conn.query_row("SELECT vec_version()", [], |row| row.get(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        debug!(%version, "sqlite-vec extension loaded");

        // A database populated by an earlier run already has the tables.
        let initialized = conn
            .call(|conn| {
                let found = conn
                    .query_row(
                        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'chunks'",
                        [],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(found.is_some())
            })
            .await?;

        Ok(Self {
            conn,
            initialized: RwLock::new(initialized),
        })
    }

    async fn ensure_initialized(&self) -> Result<(), AppError> {
        if *self.initialized.read().await {
            return Ok(());
        }
        let mut guard = self.initialized.write().await;
        if *guard {
            return Ok(());
        }
        self.conn
            .call(|conn| {
                conn.execute_batch(CREATE_TABLES_SQL)?;
                Ok(())
            })
            .await?;
        *guard = true;
        info!("created embedded vector index tables");
        Ok(())
    }

    pub async fn add(&self, records: Vec<VectorRecord>) -> Result<(), AppError> {
        if records.is_empty() {
            return Ok(());
        }
        self.ensure_initialized().await?;
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut chunk_stmt = tx.prepare(
                        "INSERT OR REPLACE INTO chunks \
                         (id, document_id, content, chunk_index, page, source, metadata) \
                         VALUES (?, ?, ?, ?, ?, ?, ?)",
                    )?;
                    let mut vector_stmt = tx.prepare(
                        "INSERT OR REPLACE INTO chunk_embeddings (id, embedding) VALUES (?, ?)",
                    )?;
                    for record in records {
                        let metadata = serde_json::to_string(&record.chunk.metadata)
                            .map_err(|err| tokio_rusqlite::Error::Other(Box::new(err)))?;
                        let embedding = serde_json::to_string(&record.vector)
                            .map_err(|err| tokio_rusqlite::Error::Other(Box::new(err)))?;
                        let chunk_index = i64::try_from(record.chunk.chunk_index).unwrap_or_default();
                        let page = record.chunk.page.map(i64::from);
                        chunk_stmt.execute(
                            [
                                &record.id as &dyn ToSql,
                                &record.chunk.document_id,
                                &record.chunk.content,
                                &chunk_index,
                                &page,
                                &record.chunk.source,
                                &metadata,
                            ]
                            .as_slice(),
                        )?;
                        vector_stmt.execute([&record.id as &dyn ToSql, &embedding].as_slice())?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Cosine-similarity search over all stored vectors. The returned entries
    /// are ordered by descending similarity and carry their stored vectors so
    /// callers can rerank without another round trip.
    pub async fn search(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: Option<&HashMap<String, String>>,
    ) -> Result<Vec<VectorEntry>, AppError> {
        let guard = self.initialized.read().await;
        if !*guard {
            return Err(AppError::NotInitialized(
                "embedded vector index has no data yet".to_string(),
            ));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let predicate = match filter {
            Some(map) => filter::to_sql_predicate(map)?,
            None => None,
        };
        let (where_clause, filter_params) = match predicate {
            Some((clause, params)) => (format!("WHERE {clause} "), params),
            None => (String::new(), Vec::new()),
        };
        let embedding_json = serde_json::to_string(query_vector)?;

        // The query vector placeholder comes first in the text, so it binds
        // before any filter parameters.
        let sql = format!(
            "SELECT c.id, c.document_id, c.content, c.chunk_index, c.page, c.source, c.metadata, \
             e.embedding, vec_distance_cosine(vec_f32(e.embedding), vec_f32(?)) AS distance \
             FROM chunks c \
             JOIN chunk_embeddings e ON c.id = e.id \
             {where_clause}ORDER BY distance ASC \
             LIMIT {k}"
        );

        type SearchRow = (
            String,
            String,
            String,
            i64,
            Option<i64>,
            String,
            String,
            String,
            f32,
        );

        let rows: Vec<SearchRow> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let mut bind: Vec<&dyn ToSql> = Vec::with_capacity(filter_params.len() + 1);
                bind.push(&embedding_json);
                for param in &filter_params {
                    bind.push(param);
                }
                let mapped = stmt.query_map(bind.as_slice(), |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                    ))
                })?;
                let mut out = Vec::new();
                for row in mapped {
                    out.push(row?);
                }
                Ok(out)
            })
            .await?;

        let entries = rows
            .into_iter()
            .map(
                |(id, document_id, content, chunk_index, page, source, metadata, embedding, distance)| {
                    let chunk = Chunk {
                        chunk_id: id,
                        document_id,
                        content,
                        chunk_index: usize::try_from(chunk_index).unwrap_or_default(),
                        page: page.and_then(|p| u32::try_from(p).ok()),
                        source,
                        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
                    };
                    VectorEntry {
                        chunk,
                        vector: serde_json::from_str(&embedding).unwrap_or_default(),
                        score: Some(1.0 - distance),
                    }
                },
            )
            .collect();

        Ok(entries)
    }

    pub async fn delete(&self, ids: &[String]) -> Result<(), AppError> {
        if ids.is_empty() || !*self.initialized.read().await {
            return Ok(());
        }
        let ids = ids.to_vec();
        self.conn
            .call(move |conn| {
                let placeholders = vec!["?"; ids.len()].join(", ");
                let tx = conn.transaction()?;
                {
                    let bind: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();
                    tx.execute(
                        &format!("DELETE FROM chunk_embeddings WHERE id IN ({placeholders})"),
                        bind.as_slice(),
                    )?;
                    tx.execute(
                        &format!("DELETE FROM chunks WHERE id IN ({placeholders})"),
                        bind.as_slice(),
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn is_ready(&self) -> bool {
        *self.initialized.read().await
    }

    pub async fn count(&self) -> Result<usize, AppError> {
        if !*self.initialized.read().await {
            return Ok(0);
        }
        let count: i64 = self
            .conn
            .call(|conn| {
                conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, document_id: &str, index: usize, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            chunk: Chunk::new(document_id, index, format!("content of {id}"), "test.txt".to_string()),
            vector,
        }
    }

    #[tokio::test]
    async fn search_before_first_add_reports_not_initialized() {
        let index = EmbeddedIndex::open_in_memory().await.unwrap();
        assert!(!index.is_ready().await);
        let result = index.search(&[1.0, 0.0], 5, None).await;
        assert!(matches!(result, Err(AppError::NotInitialized(_))));
    }

    #[tokio::test]
    async fn add_then_search_round_trips_the_chunk() {
        let index = EmbeddedIndex::open_in_memory().await.unwrap();
        let mut chunk = Chunk::new("doc-1", 0, "alpha".to_string(), "a.txt".to_string());
        chunk.page = Some(3);
        chunk.metadata.insert("department".to_string(), "legal".to_string());
        let stored = VectorRecord {
            id: chunk.chunk_id.clone(),
            chunk: chunk.clone(),
            vector: vec![1.0, 0.0, 0.0],
        };
        index.add(vec![stored]).await.unwrap();
        assert!(index.is_ready().await);

        let hits = index.search(&[1.0, 0.0, 0.0], 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        let entry = hits.into_iter().next().unwrap();
        assert_eq!(entry.chunk, chunk);
        assert_eq!(entry.vector, vec![1.0, 0.0, 0.0]);
        assert!(entry.score.unwrap() > 0.99);
    }

    #[tokio::test]
    async fn results_are_ordered_by_similarity() {
        let index = EmbeddedIndex::open_in_memory().await.unwrap();
        index
            .add(vec![
                record("far", "doc-1", 0, vec![0.0, 1.0, 0.0]),
                record("near", "doc-1", 1, vec![1.0, 0.0, 0.0]),
                record("mid", "doc-1", 2, vec![0.7, 0.7, 0.0]),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0], 3, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|e| e.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
    }

    #[tokio::test]
    async fn document_filter_narrows_results() {
        let index = EmbeddedIndex::open_in_memory().await.unwrap();
        index
            .add(vec![
                record("a", "doc-1", 0, vec![1.0, 0.0]),
                record("b", "doc-2", 0, vec![0.9, 0.1]),
            ])
            .await
            .unwrap();

        let filter = HashMap::from([("document_id".to_string(), "doc-2".to_string())]);
        let hits = index.search(&[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(
            hits.first().map(|e| e.chunk.document_id.as_str()),
            Some("doc-2")
        );
    }

    #[tokio::test]
    async fn metadata_filter_matches_json_fields() {
        let index = EmbeddedIndex::open_in_memory().await.unwrap();
        let mut tagged = record("tagged", "doc-1", 0, vec![1.0, 0.0]);
        tagged
            .chunk
            .metadata
            .insert("department".to_string(), "legal".to_string());
        index
            .add(vec![tagged, record("plain", "doc-1", 1, vec![1.0, 0.0])])
            .await
            .unwrap();

        let filter = HashMap::from([("department".to_string(), "legal".to_string())]);
        let hits = index.search(&[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(
            hits.first().map(|e| e.chunk.chunk_id.as_str()),
            Some("tagged")
        );
    }

    #[tokio::test]
    async fn delete_removes_chunks_and_vectors() {
        let index = EmbeddedIndex::open_in_memory().await.unwrap();
        index
            .add(vec![
                record("keep", "doc-1", 0, vec![1.0, 0.0]),
                record("drop", "doc-1", 1, vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        index.delete(&["drop".to_string()]).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
        let hits = index.search(&[0.0, 1.0], 10, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|e| e.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["keep"]);
    }

    #[tokio::test]
    async fn reopened_database_is_already_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.db");

        {
            let index = EmbeddedIndex::open(&path).await.unwrap();
            index
                .add(vec![record("a", "doc-1", 0, vec![1.0, 0.0])])
                .await
                .unwrap();
        }

        let reopened = EmbeddedIndex::open(&path).await.unwrap();
        assert!(reopened.is_ready().await);
        let hits = reopened.search(&[1.0, 0.0], 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);
    }
}

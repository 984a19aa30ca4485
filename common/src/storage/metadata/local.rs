use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio_rusqlite::{Connection, OptionalExtension, ToSql};

use crate::error::AppError;
use crate::storage::types::conversation::{Conversation, ConversationMessage};
use crate::storage::types::document::DocumentRecord;

/// File-backed metadata store used when no SurrealDB address is configured.
/// All statements run on the connection's single worker thread, so the
/// read-modify-write in `append_messages` cannot interleave in-process.
#[derive(Clone)]
pub struct LocalMetadataStore {
    conn: Connection,
}

type DocumentRow = (
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    i64,
    Option<String>,
    Option<String>,
);

type ConversationRow = (String, String, String, String, i64, String, String);

impl LocalMetadataStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let conn = Connection::open(path.as_ref().to_path_buf()).await?;
        Self::initialize(conn).await
    }

    async fn initialize(conn: Connection) -> Result<Self, AppError> {
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS documents (
                    id TEXT PRIMARY KEY,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    filename TEXT NOT NULL,
                    file_type TEXT NOT NULL,
                    file_size INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    chunk_count INTEGER NOT NULL DEFAULT 0,
                    blob_url TEXT,
                    error_message TEXT
                );
                CREATE TABLE IF NOT EXISTS conversations (
                    id TEXT PRIMARY KEY,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    title TEXT NOT NULL,
                    message_count INTEGER NOT NULL DEFAULT 0,
                    messages TEXT NOT NULL DEFAULT '[]',
                    metadata TEXT NOT NULL DEFAULT '{}'
                );",
            )
            .map_err(tokio_rusqlite::Error::Rusqlite)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    pub async fn save_document(&self, record: &DocumentRecord) -> Result<(), AppError> {
        let record = record.clone();
        self.conn
            .call(move |conn| {
                let created_at = format_timestamp(&record.created_at);
                let updated_at = format_timestamp(&record.updated_at);
                let file_size = i64::try_from(record.file_size).unwrap_or_default();
                let status = record.status.to_string();
                let chunk_count = i64::try_from(record.chunk_count).unwrap_or_default();

                conn.execute(
                    "INSERT OR REPLACE INTO documents \
                     (id, created_at, updated_at, filename, file_type, file_size, status, chunk_count, blob_url, error_message) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    [
                        &record.id as &dyn ToSql,
                        &created_at,
                        &updated_at,
                        &record.filename,
                        &record.file_type,
                        &file_size,
                        &status,
                        &chunk_count,
                        &record.blob_url,
                        &record.error_message,
                    ]
                    .as_slice(),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>, AppError> {
        let id = id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT id, created_at, updated_at, filename, file_type, file_size, status, chunk_count, blob_url, error_message \
                     FROM documents WHERE id = ?1",
                    [&id],
                    |row| {
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
                            row.get(9)?,
                        ))
                    },
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;

        row.map(row_to_document).transpose()
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentRecord>, AppError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, created_at, updated_at, filename, file_type, file_size, status, chunk_count, blob_url, error_message \
                         FROM documents ORDER BY updated_at DESC",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let rows = stmt
                    .query_map([], |row| {
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
                            row.get(9)?,
                        ))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let mut results = Vec::new();
                for row in rows {
                    results.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(results)
            })
            .await?;

        rows.into_iter().map(row_to_document).collect()
    }

    pub async fn delete_document(&self, id: &str) -> Result<(), AppError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM documents WHERE id = ?1", [&id])
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn save_conversation(&self, conversation: &Conversation) -> Result<(), AppError> {
        let messages = serde_json::to_string(&conversation.messages)?;
        let metadata = serde_json::to_string(&conversation.metadata)?;
        let conversation = conversation.clone();
        self.conn
            .call(move |conn| {
                let created_at = format_timestamp(&conversation.created_at);
                let updated_at = format_timestamp(&conversation.updated_at);
                let message_count =
                    i64::try_from(conversation.message_count).unwrap_or_default();

                conn.execute(
                    "INSERT OR REPLACE INTO conversations \
                     (id, created_at, updated_at, title, message_count, messages, metadata) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    [
                        &conversation.id as &dyn ToSql,
                        &created_at,
                        &updated_at,
                        &conversation.title,
                        &message_count,
                        &messages,
                        &metadata,
                    ]
                    .as_slice(),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, AppError> {
        let id = id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT id, created_at, updated_at, title, message_count, messages, metadata \
                     FROM conversations WHERE id = ?1",
                    [&id],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                        ))
                    },
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;

        row.map(row_to_conversation).transpose()
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, AppError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, created_at, updated_at, title, message_count, messages, metadata \
                         FROM conversations ORDER BY updated_at DESC",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                        ))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let mut results = Vec::new();
                for row in rows {
                    results.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(results)
            })
            .await?;

        rows.into_iter().map(row_to_conversation).collect()
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<(), AppError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM conversations WHERE id = ?1", [&id])
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// The whole read-modify-write runs inside one `call`, so appends issued
    /// through this connection are applied sequentially.
    pub async fn append_messages(
        &self,
        conversation_id: &str,
        messages: Vec<ConversationMessage>,
    ) -> Result<Conversation, AppError> {
        let id = conversation_id.to_string();
        let fallback_title = super::derive_title(&messages);

        let conversation = self
            .conn
            .call(move |conn| {
                let existing = conn
                    .query_row(
                        "SELECT id, created_at, updated_at, title, message_count, messages, metadata \
                         FROM conversations WHERE id = ?1",
                        [&id],
                        |row| {
                            Ok((
                                row.get(0)?,
                                row.get(1)?,
                                row.get(2)?,
                                row.get(3)?,
                                row.get(4)?,
                                row.get(5)?,
                                row.get(6)?,
                            ))
                        },
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let mut conversation = match existing {
                    Some(row) => row_to_conversation_raw(row)?,
                    None => Conversation::with_id(id, fallback_title),
                };

                for message in messages {
                    conversation.push_message(message);
                }

                let serialized_messages =
                    serde_json::to_string(&conversation.messages).map_err(other_err)?;
                let serialized_metadata =
                    serde_json::to_string(&conversation.metadata).map_err(other_err)?;
                let created_at = format_timestamp(&conversation.created_at);
                let updated_at = format_timestamp(&conversation.updated_at);
                let message_count =
                    i64::try_from(conversation.message_count).unwrap_or_default();

                conn.execute(
                    "INSERT OR REPLACE INTO conversations \
                     (id, created_at, updated_at, title, message_count, messages, metadata) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    [
                        &conversation.id as &dyn ToSql,
                        &created_at,
                        &updated_at,
                        &conversation.title,
                        &message_count,
                        &serialized_messages,
                        &serialized_metadata,
                    ]
                    .as_slice(),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;

                Ok(conversation)
            })
            .await?;

        Ok(conversation)
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl LocalMetadataStore {
    /// In-memory sqlite store for tests.
    pub async fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory().await?;
        Self::initialize(conn).await
    }
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    // Fixed fractional precision keeps TEXT ordering chronological.
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn other_err<E>(err: E) -> tokio_rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    tokio_rusqlite::Error::Other(Box::new(err))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, tokio_rusqlite::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(other_err)
}

fn row_to_document(row: DocumentRow) -> Result<DocumentRecord, AppError> {
    let (
        id,
        created_at,
        updated_at,
        filename,
        file_type,
        file_size,
        status,
        chunk_count,
        blob_url,
        error_message,
    ) = row;

    Ok(DocumentRecord {
        id,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        filename,
        file_type,
        file_size: u64::try_from(file_size).unwrap_or_default(),
        status: status.parse()?,
        chunk_count: usize::try_from(chunk_count).unwrap_or_default(),
        blob_url,
        error_message,
    })
}

fn row_to_conversation(row: ConversationRow) -> Result<Conversation, AppError> {
    Ok(row_to_conversation_raw(row)?)
}

fn row_to_conversation_raw(row: ConversationRow) -> Result<Conversation, tokio_rusqlite::Error> {
    let (id, created_at, updated_at, title, message_count, messages, metadata) = row;

    Ok(Conversation {
        id,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        title,
        message_count: usize::try_from(message_count).unwrap_or_default(),
        messages: serde_json::from_str(&messages).map_err(other_err)?,
        metadata: serde_json::from_str(&metadata).map_err(other_err)?,
    })
}

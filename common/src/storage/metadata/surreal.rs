use std::sync::Arc;

use crate::error::AppError;
use crate::storage::db::SurrealDbClient;
use crate::storage::types::conversation::{Conversation, ConversationMessage};
use crate::storage::types::document::DocumentRecord;
use crate::storage::types::StoredObject;

#[derive(Clone)]
pub struct SurrealMetadataStore {
    db: Arc<SurrealDbClient>,
}

impl SurrealMetadataStore {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    pub async fn save_document(&self, record: &DocumentRecord) -> Result<(), AppError> {
        self.db.upsert_item(record.clone()).await?;
        Ok(())
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>, AppError> {
        Ok(self.db.get_item(id).await?)
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentRecord>, AppError> {
        let mut response = self
            .db
            .query("SELECT * FROM type::table($table) ORDER BY updated_at DESC")
            .bind(("table", DocumentRecord::table_name()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn delete_document(&self, id: &str) -> Result<(), AppError> {
        self.db.delete_item::<DocumentRecord>(id).await?;
        Ok(())
    }

    pub async fn save_conversation(&self, conversation: &Conversation) -> Result<(), AppError> {
        self.db.upsert_item(conversation.clone()).await?;
        Ok(())
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, AppError> {
        Ok(self.db.get_item(id).await?)
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, AppError> {
        let mut response = self
            .db
            .query("SELECT * FROM type::table($table) ORDER BY updated_at DESC")
            .bind(("table", Conversation::table_name()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<(), AppError> {
        self.db.delete_item::<Conversation>(id).await?;
        Ok(())
    }

    pub async fn append_messages(
        &self,
        conversation_id: &str,
        messages: Vec<ConversationMessage>,
    ) -> Result<Conversation, AppError> {
        let mut conversation = self.get_conversation(conversation_id).await?.unwrap_or_else(|| {
            Conversation::with_id(conversation_id.to_string(), super::derive_title(&messages))
        });

        for message in messages {
            conversation.push_message(message);
        }

        self.save_conversation(&conversation).await?;
        Ok(conversation)
    }
}

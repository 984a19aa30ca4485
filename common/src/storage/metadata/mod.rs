use std::path::Path;
use std::sync::Arc;

use crate::error::AppError;
use crate::storage::db::SurrealDbClient;
use crate::storage::types::conversation::{Conversation, ConversationMessage};
use crate::storage::types::document::DocumentRecord;
use crate::utils::config::AppConfig;

mod local;
mod surreal;

pub use local::LocalMetadataStore;
pub use surreal::SurrealMetadataStore;

const METADATA_DB_FILE: &str = "metadata.db";
const TITLE_MAX_CHARS: usize = 60;

/// Document and conversation persistence behind one capability set. Which
/// backend is active is decided once at construction; callers never branch
/// on it.
#[derive(Clone)]
pub struct MetadataStore {
    inner: MetadataInner,
}

#[derive(Clone)]
enum MetadataInner {
    Surreal(SurrealMetadataStore),
    Local(LocalMetadataStore),
}

impl MetadataStore {
    /// A configured SurrealDB address selects the remote store; without one,
    /// a sqlite file under `data_dir` is used.
    pub async fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        match &config.surrealdb_address {
            Some(address) => {
                let client = SurrealDbClient::new(
                    address,
                    &config.surrealdb_username,
                    &config.surrealdb_password,
                    &config.surrealdb_namespace,
                    &config.surrealdb_database,
                )
                .await?;
                client.ensure_initialized().await?;
                Ok(Self::surreal(Arc::new(client)))
            }
            None => {
                let dir = Path::new(&config.data_dir);
                tokio::fs::create_dir_all(dir).await?;
                let store = LocalMetadataStore::open(dir.join(METADATA_DB_FILE)).await?;
                Ok(Self::local(store))
            }
        }
    }

    pub fn surreal(client: Arc<SurrealDbClient>) -> Self {
        Self {
            inner: MetadataInner::Surreal(SurrealMetadataStore::new(client)),
        }
    }

    pub fn local(store: LocalMetadataStore) -> Self {
        Self {
            inner: MetadataInner::Local(store),
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            MetadataInner::Surreal(_) => "surrealdb",
            MetadataInner::Local(_) => "sqlite",
        }
    }

    pub async fn save_document(&self, record: &DocumentRecord) -> Result<(), AppError> {
        match &self.inner {
            MetadataInner::Surreal(store) => store.save_document(record).await,
            MetadataInner::Local(store) => store.save_document(record).await,
        }
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>, AppError> {
        match &self.inner {
            MetadataInner::Surreal(store) => store.get_document(id).await,
            MetadataInner::Local(store) => store.get_document(id).await,
        }
    }

    /// All documents, most recently updated first.
    pub async fn list_documents(&self) -> Result<Vec<DocumentRecord>, AppError> {
        match &self.inner {
            MetadataInner::Surreal(store) => store.list_documents().await,
            MetadataInner::Local(store) => store.list_documents().await,
        }
    }

    pub async fn delete_document(&self, id: &str) -> Result<(), AppError> {
        match &self.inner {
            MetadataInner::Surreal(store) => store.delete_document(id).await,
            MetadataInner::Local(store) => store.delete_document(id).await,
        }
    }

    pub async fn save_conversation(&self, conversation: &Conversation) -> Result<(), AppError> {
        match &self.inner {
            MetadataInner::Surreal(store) => store.save_conversation(conversation).await,
            MetadataInner::Local(store) => store.save_conversation(conversation).await,
        }
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, AppError> {
        match &self.inner {
            MetadataInner::Surreal(store) => store.get_conversation(id).await,
            MetadataInner::Local(store) => store.get_conversation(id).await,
        }
    }

    /// All conversations, most recently updated first.
    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, AppError> {
        match &self.inner {
            MetadataInner::Surreal(store) => store.list_conversations().await,
            MetadataInner::Local(store) => store.list_conversations().await,
        }
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<(), AppError> {
        match &self.inner {
            MetadataInner::Surreal(store) => store.delete_conversation(id).await,
            MetadataInner::Local(store) => store.delete_conversation(id).await,
        }
    }

    /// Appends messages to a conversation, creating it on first use. The
    /// append is a read-modify-write without a version check; concurrent
    /// appends to the same conversation id can lose updates.
    pub async fn append_messages(
        &self,
        conversation_id: &str,
        messages: Vec<ConversationMessage>,
    ) -> Result<Conversation, AppError> {
        match &self.inner {
            MetadataInner::Surreal(store) => {
                store.append_messages(conversation_id, messages).await
            }
            MetadataInner::Local(store) => store.append_messages(conversation_id, messages).await,
        }
    }
}

/// Title for a conversation created implicitly by its first append.
pub(crate) fn derive_title(messages: &[ConversationMessage]) -> String {
    messages
        .first()
        .map_or_else(|| "New conversation".to_string(), |message| {
            let mut title: String = message.content.trim().chars().take(TITLE_MAX_CHARS).collect();
            if title.is_empty() {
                title = "New conversation".to_string();
            }
            title
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::conversation::MessageRole;

    #[test]
    fn derive_title_truncates_long_questions() {
        let long = "a".repeat(200);
        let messages = vec![ConversationMessage::new(MessageRole::User, long, None)];
        let title = derive_title(&messages);
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS);
    }

    #[test]
    fn derive_title_falls_back_when_empty() {
        assert_eq!(derive_title(&[]), "New conversation");
        let blank = vec![ConversationMessage::new(
            MessageRole::User,
            "   ".to_string(),
            None,
        )];
        assert_eq!(derive_title(&blank), "New conversation");
    }
}

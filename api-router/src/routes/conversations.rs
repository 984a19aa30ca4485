use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use common::storage::types::conversation::Conversation;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api_state::ApiState;
use crate::error::ApiError;

const DEFAULT_TITLE: &str = "New conversation";

#[derive(Deserialize, Debug, Default)]
pub struct ConversationCreateRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Conversation metadata without the message bodies; full transcripts stay
/// server-side.
#[derive(Serialize, Debug)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub metadata: HashMap<String, Value>,
}

impl From<Conversation> for ConversationSummary {
    fn from(conversation: Conversation) -> Self {
        Self {
            conversation_id: conversation.id,
            title: conversation.title,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            message_count: conversation.message_count,
            metadata: conversation.metadata,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationSummary>,
    pub total: usize,
}

#[derive(Serialize, Debug)]
pub struct ConversationDeleteResponse {
    pub conversation_id: String,
    pub deleted: bool,
    pub message: String,
}

pub async fn create_conversation(
    State(state): State<ApiState>,
    Json(request): Json<ConversationCreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = request
        .title
        .filter(|title| !title.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());
    let mut conversation = Conversation::new(title);
    conversation.metadata = request.metadata;

    state.metadata.save_conversation(&conversation).await?;
    Ok((
        StatusCode::OK,
        Json(ConversationSummary::from(conversation)),
    ))
}

pub async fn list_conversations(
    State(state): State<ApiState>,
) -> Result<impl IntoResponse, ApiError> {
    let conversations: Vec<ConversationSummary> = state
        .metadata
        .list_conversations()
        .await?
        .into_iter()
        .map(ConversationSummary::from)
        .collect();
    let total = conversations.len();
    Ok(Json(ConversationListResponse {
        conversations,
        total,
    }))
}

pub async fn get_conversation(
    State(state): State<ApiState>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .metadata
        .get_conversation(&conversation_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("conversation '{conversation_id}'")))?;
    Ok(Json(ConversationSummary::from(conversation)))
}

pub async fn delete_conversation(
    State(state): State<ApiState>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state
        .metadata
        .get_conversation(&conversation_id)
        .await?
        .is_none()
    {
        return Err(ApiError::NotFound(format!(
            "conversation '{conversation_id}'"
        )));
    }

    state.metadata.delete_conversation(&conversation_id).await?;
    Ok(Json(ConversationDeleteResponse {
        conversation_id,
        deleted: true,
        message: "Conversation deleted successfully".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::conversation::{ConversationMessage, MessageRole};

    #[test]
    fn summary_carries_counts_but_not_messages() {
        let mut conversation = Conversation::new("Rust questions".to_string());
        conversation.push_message(ConversationMessage::new(
            MessageRole::User,
            "What is a lifetime?".to_string(),
            None,
        ));

        let summary = ConversationSummary::from(conversation);
        let json = serde_json::to_value(&summary).expect("serialize");

        assert_eq!(
            json.get("title").and_then(Value::as_str),
            Some("Rust questions")
        );
        assert_eq!(
            json.get("message_count").and_then(Value::as_u64),
            Some(1)
        );
        assert!(json.get("conversation_id").is_some());
        assert!(json.get("messages").is_none());
    }

    #[test]
    fn create_request_defaults_are_empty() {
        let request: ConversationCreateRequest =
            serde_json::from_str("{}").expect("deserialize");
        assert!(request.title.is_none());
        assert!(request.metadata.is_empty());
    }
}

use std::collections::HashMap;
use std::fmt;

use uuid::Uuid;

use crate::stored_object;

#[derive(Deserialize, Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

stored_object!(Conversation, "conversation", {
    title: String,
    #[serde(default)]
    message_count: usize,
    #[serde(default)]
    messages: Vec<ConversationMessage>,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>
});

impl Conversation {
    pub fn new(title: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            title,
            message_count: 0,
            messages: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_id(id: String, title: String) -> Self {
        let mut conversation = Self::new(title);
        conversation.id = id;
        conversation
    }

    /// Appends from the query path only; messages are never removed or edited.
    pub fn push_message(&mut self, message: ConversationMessage) {
        self.messages.push(message);
        self.message_count = self.messages.len();
        self.updated_at = Utc::now();
    }

    /// Last `turns` messages in chronological order.
    pub fn recent_messages(&self, turns: usize) -> &[ConversationMessage] {
        let start = self.messages.len().saturating_sub(turns);
        self.messages.get(start..).unwrap_or_default()
    }
}

impl ConversationMessage {
    pub fn new(
        role: MessageRole,
        content: String,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Self {
        Self {
            role,
            content,
            timestamp: Utc::now(),
            metadata,
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

impl fmt::Display for ConversationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}

// helper function to format a slice of messages for prompt context
pub fn format_history(history: &[ConversationMessage]) -> String {
    history
        .iter()
        .map(|msg| format!("{msg}"))
        .collect::<Vec<String>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_message_bumps_count_and_timestamp() {
        let mut conversation = Conversation::new("Rust questions".to_string());
        let before = conversation.updated_at;

        conversation.push_message(ConversationMessage::new(
            MessageRole::User,
            "What is ownership?".to_string(),
            None,
        ));
        conversation.push_message(ConversationMessage::new(
            MessageRole::Assistant,
            "Ownership is Rust's memory model.".to_string(),
            None,
        ));

        assert_eq!(conversation.message_count, 2);
        assert_eq!(conversation.messages.len(), 2);
        assert!(conversation.updated_at >= before);
    }

    #[test]
    fn recent_messages_returns_tail() {
        let mut conversation = Conversation::new("History".to_string());
        for i in 0..8 {
            conversation.push_message(ConversationMessage::new(
                MessageRole::User,
                format!("message {i}"),
                None,
            ));
        }

        let recent = conversation.recent_messages(5);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent.first().map(|m| m.content.as_str()), Some("message 3"));
        assert_eq!(recent.last().map(|m| m.content.as_str()), Some("message 7"));

        let all = conversation.recent_messages(100);
        assert_eq!(all.len(), 8);
    }

    #[test]
    fn role_display_is_lowercase() {
        assert_eq!(format!("{}", MessageRole::User), "user");
        assert_eq!(format!("{}", MessageRole::Assistant), "assistant");
        assert_eq!(format!("{}", MessageRole::System), "system");
    }

    #[test]
    fn format_history_joins_role_content_lines() {
        let messages = vec![
            ConversationMessage::new(MessageRole::User, "Hello".to_string(), None),
            ConversationMessage::new(MessageRole::Assistant, "Hi there!".to_string(), None),
        ];

        let formatted = format_history(&messages);
        assert_eq!(formatted, "user: Hello\nassistant: Hi there!");
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&MessageRole::Assistant).expect("serialize");
        assert_eq!(json, "\"assistant\"");
    }
}

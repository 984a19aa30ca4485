use common::storage::types::conversation::{format_history, ConversationMessage};

/// Number of trailing conversation messages folded into the search text.
pub const HISTORY_TURNS: usize = 5;

/// Builds the text that is embedded and searched. With history present the
/// last [`HISTORY_TURNS`] messages are prepended as `role: content` lines so
/// retrieval sees the conversational context; the raw question is still what
/// reaches the generator prompt and the user.
pub fn enhance(question: &str, history: &[ConversationMessage]) -> String {
    if history.is_empty() {
        return question.to_owned();
    }

    let start = history.len().saturating_sub(HISTORY_TURNS);
    let recent = history.get(start..).unwrap_or_default();

    format!(
        "Context from conversation:\n{}\n\nQuestion: {question}",
        format_history(recent)
    )
}

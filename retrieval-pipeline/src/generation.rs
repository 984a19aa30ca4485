use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
};
use async_openai::Client;
use async_trait::async_trait;
use common::error::AppError;
use common::utils::config::AppConfig;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use vector_store::SearchHit;

/// Grounding instruction sent with every generation call. Answers must come
/// from the supplied documents and cite them by bracketed number.
const SYSTEM_PROMPT: &str = "You answer questions using only the provided context documents. \
Cite the documents you draw from with bracketed numbers like [1]. \
If the context does not contain the answer, say that instead of guessing.";

/// Inputs for one generation call. `context` holds the numbered document
/// blocks; the question is the raw user question, not the search-enhanced
/// form.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub question: String,
    pub context: String,
    pub temperature: f32,
}

/// The text-generation boundary. Implementations receive fully built prompt
/// inputs and return the final answer text; delivery concerns like streaming
/// live above this trait.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, AppError>;
}

/// Formats the used chunks as `[Document i]: <content>` blocks, numbered from
/// 1 in the order the chunks are handed over. Citation numbers in the answer
/// refer to these positions.
pub fn build_context(used: &[SearchHit]) -> String {
    used.iter()
        .enumerate()
        .map(|(index, hit)| {
            format!(
                "[Document {}]: {}",
                index.saturating_add(1),
                hit.chunk.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_user_message(request: &GenerationRequest) -> String {
    format!(
        "Context:\n{}\n\nQuestion: {}",
        request.context, request.question
    )
}

pub fn build_chat_request(
    model: &str,
    request: &GenerationRequest,
) -> Result<CreateChatCompletionRequest, OpenAIError> {
    CreateChatCompletionRequestArgs::default()
        .model(model)
        .temperature(request.temperature)
        .messages([
            ChatCompletionRequestSystemMessage::from(SYSTEM_PROMPT).into(),
            ChatCompletionRequestUserMessage::from(build_user_message(request)).into(),
        ])
        .build()
}

pub fn extract_answer(response: CreateChatCompletionResponse) -> Result<String, AppError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| {
            AppError::BackendOperation("chat completion contained no content".to_owned())
        })
}

/// Chat-completion backed generator. Calls are retried with jittered
/// exponential backoff since the core pipeline itself never retries.
pub struct OpenAiGenerator {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: String) -> Self {
        Self { client, model }
    }

    pub fn from_config(config: &AppConfig, client: Arc<Client<OpenAIConfig>>) -> Self {
        Self::new(client, config.chat_model.clone())
    }
}

#[async_trait]
impl AnswerGenerator for OpenAiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, AppError> {
        let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
        let response = Retry::spawn(retry_strategy, || async {
            let chat_request = build_chat_request(&self.model, request)?;
            self.client.chat().create(chat_request).await
        })
        .await?;

        extract_answer(response)
    }
}

/// Canned generator for exercising the query pipeline without a model behind
/// it.
#[cfg(any(test, feature = "test-utils"))]
pub struct ScriptedGenerator {
    outcome: Result<String, String>,
}

#[cfg(any(test, feature = "test-utils"))]
impl ScriptedGenerator {
    pub fn answering(answer: impl Into<String>) -> Self {
        Self {
            outcome: Ok(answer.into()),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            outcome: Err(message.into()),
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl AnswerGenerator for ScriptedGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, AppError> {
        match &self.outcome {
            Ok(answer) => Ok(answer.clone()),
            Err(message) => Err(AppError::BackendOperation(message.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::chunk::Chunk;

    fn hit(content: &str) -> SearchHit {
        SearchHit {
            chunk: Chunk::new("doc", 0, content.to_owned(), "doc.txt".to_owned()),
            score: Some(0.5),
        }
    }

    fn request(question: &str, context: &str) -> GenerationRequest {
        GenerationRequest {
            question: question.to_owned(),
            context: context.to_owned(),
            temperature: 0.2,
        }
    }

    #[test]
    fn context_blocks_are_numbered_from_one() {
        let context = build_context(&[hit("alpha facts"), hit("beta facts")]);
        assert_eq!(
            context,
            "[Document 1]: alpha facts\n\n[Document 2]: beta facts"
        );
    }

    #[test]
    fn empty_chunk_list_yields_empty_context() {
        assert_eq!(build_context(&[]), "");
    }

    #[test]
    fn user_message_carries_context_and_question() {
        let message = build_user_message(&request("what is alpha?", "[Document 1]: alpha facts"));
        assert!(message.contains("[Document 1]: alpha facts"));
        assert!(message.ends_with("Question: what is alpha?"));
    }

    #[test]
    fn chat_request_sets_model_and_temperature() {
        let built =
            build_chat_request("gpt-4o-mini", &request("q", "ctx")).expect("request builds");
        assert_eq!(built.model, "gpt-4o-mini");
        assert_eq!(built.messages.len(), 2);
        assert_eq!(built.temperature, Some(0.2));
    }

    #[tokio::test]
    async fn scripted_generator_replays_its_answer() {
        let generator = ScriptedGenerator::answering("the answer is alpha [1]");
        let answer = generator
            .generate(&request("what is alpha?", "ctx"))
            .await
            .expect("generate");
        assert_eq!(answer, "the answer is alpha [1]");
    }

    #[tokio::test]
    async fn scripted_generator_surfaces_failures() {
        let generator = ScriptedGenerator::failing("model offline");
        let err = generator
            .generate(&request("q", "ctx"))
            .await
            .expect_err("failure");
        assert!(matches!(err, AppError::BackendOperation(_)));
    }
}

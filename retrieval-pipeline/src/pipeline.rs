use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::error::AppError;
use common::storage::metadata::MetadataStore;
use common::storage::types::conversation::{ConversationMessage, MessageRole};
use common::storage::types::query::{QueryRequest, QueryResponse};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};
use vector_store::{SearchHit, VectorStore};

use crate::citations;
use crate::cost;
use crate::enhancement;
use crate::generation::{build_context, AnswerGenerator, GenerationRequest};
use crate::retriever::{rerank, Retriever};
use crate::scoring::ConfidenceCalculator;

/// Stages of one query cycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Validate,
    Enhance,
    Retrieve,
    Rerank,
    Generate,
    Score,
    Cite,
    Persist,
}

impl StageKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Enhance => "enhance",
            Self::Retrieve => "retrieve",
            Self::Rerank => "rerank",
            Self::Generate => "generate",
            Self::Score => "score",
            Self::Cite => "cite",
            Self::Persist => "persist",
        }
    }
}

/// Wall-clock time of each completed stage, in execution order. A stage that
/// failed part-way is not recorded.
#[derive(Debug, Default, Clone)]
pub struct StageTimings {
    timings: Vec<(StageKind, Duration)>,
}

impl StageTimings {
    pub fn record(&mut self, kind: StageKind, elapsed: Duration) {
        self.timings.push((kind, elapsed));
    }

    pub fn stage_ms(&self, kind: StageKind) -> u64 {
        self.timings
            .iter()
            .find(|(recorded, _)| *recorded == kind)
            .map_or(0, |(_, elapsed)| as_millis(*elapsed))
    }

    /// Per-stage milliseconds keyed by stage label, for the response trace.
    pub fn as_json(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .timings
            .iter()
            .map(|(kind, elapsed)| (kind.label().to_owned(), json!(as_millis(*elapsed))))
            .collect();
        Value::Object(map)
    }
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Runs one question/answer cycle end to end: validation, conversation-aware
/// search enhancement, diverse retrieval, rerank, grounded generation,
/// confidence scoring, citation assembly, and best-effort persistence of the
/// exchange.
pub struct QueryOrchestrator {
    vector_store: Arc<VectorStore>,
    retriever: Retriever,
    generator: Arc<dyn AnswerGenerator>,
    confidence: ConfidenceCalculator,
    metadata: MetadataStore,
}

impl QueryOrchestrator {
    pub fn new(
        vector_store: Arc<VectorStore>,
        metadata: MetadataStore,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Self {
        let confidence = ConfidenceCalculator::new(Arc::clone(vector_store.embedder()));
        Self {
            retriever: Retriever::new(Arc::clone(&vector_store)),
            generator,
            confidence,
            metadata,
            vector_store,
        }
    }

    #[instrument(skip_all)]
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, AppError> {
        let preview: String = request
            .question
            .chars()
            .take(120)
            .collect::<String>()
            .replace('\n', " ");
        debug!(
            question_chars = request.question.chars().count(),
            preview = %preview,
            "starting query pipeline"
        );

        let started = Instant::now();
        let mut timings = StageTimings::default();

        let mut response = self.run(request, &mut timings).await?;
        response.elapsed_ms = as_millis(started.elapsed());
        response
            .metadata
            .insert("stage_timings_ms".to_owned(), timings.as_json());

        info!(
            top_k = request.top_k,
            chunks_retrieved = response.chunks_retrieved,
            chunks_used = response.chunks_used,
            confidence = response.confidence,
            elapsed_ms = response.elapsed_ms,
            "query answered"
        );
        Ok(response)
    }

    async fn run(
        &self,
        request: &QueryRequest,
        timings: &mut StageTimings,
    ) -> Result<QueryResponse, AppError> {
        let stage = Instant::now();
        request
            .validate()
            .map_err(|err| stage_error(StageKind::Validate, err))?;
        if !self.vector_store.is_ready().await {
            return Err(stage_error(
                StageKind::Validate,
                AppError::Validation(
                    "no documents have been indexed yet; index documents first".to_owned(),
                ),
            ));
        }
        timings.record(StageKind::Validate, stage.elapsed());

        let stage = Instant::now();
        let history = self
            .conversation_history(request)
            .await
            .map_err(|err| stage_error(StageKind::Enhance, err))?;
        let search_text = enhancement::enhance(&request.question, &history);
        timings.record(StageKind::Enhance, stage.elapsed());

        let stage = Instant::now();
        let candidates = self
            .retriever
            .fetch_candidates(&search_text, request.top_k, request.filter.as_ref())
            .await
            .map_err(|err| stage_error(StageKind::Retrieve, err))?;
        let chunks_retrieved = candidates.len();
        timings.record(StageKind::Retrieve, stage.elapsed());

        let stage = Instant::now();
        let used = rerank(candidates, request.top_k);
        timings.record(StageKind::Rerank, stage.elapsed());

        let stage = Instant::now();
        let generation_request = GenerationRequest {
            question: request.question.clone(),
            context: build_context(&used),
            temperature: request.temperature,
        };
        let answer = self
            .generator
            .generate(&generation_request)
            .await
            .map_err(|err| stage_error(StageKind::Generate, err))?;
        timings.record(StageKind::Generate, stage.elapsed());

        let stage = Instant::now();
        let confidence = self
            .confidence
            .score(&request.question, &answer, chunks_retrieved, &used)
            .await
            .map_err(|err| stage_error(StageKind::Score, err))?;
        timings.record(StageKind::Score, stage.elapsed());

        let stage = Instant::now();
        let citations = if request.include_sources {
            citations::build(&used)
        } else {
            Vec::new()
        };
        timings.record(StageKind::Cite, stage.elapsed());

        let metadata = response_metadata(&generation_request, &used);

        let stage = Instant::now();
        self.persist_exchange(request, &answer, &metadata).await;
        timings.record(StageKind::Persist, stage.elapsed());

        let estimated_cost_usd = cost::estimate(used.len(), answer.chars().count());
        Ok(QueryResponse {
            answer,
            citations,
            related_questions: Vec::new(),
            confidence,
            chunks_retrieved,
            chunks_used: used.len(),
            elapsed_ms: 0,
            estimated_cost_usd,
            conversation_id: request.conversation_id.clone(),
            metadata,
        })
    }

    /// Prior messages of the named conversation; empty when the request names
    /// none or the conversation does not exist yet.
    async fn conversation_history(
        &self,
        request: &QueryRequest,
    ) -> Result<Vec<ConversationMessage>, AppError> {
        let Some(conversation_id) = request.conversation_id.as_deref() else {
            return Ok(Vec::new());
        };
        let conversation = self.metadata.get_conversation(conversation_id).await?;
        Ok(conversation.map(|c| c.messages).unwrap_or_default())
    }

    /// Appends the question/answer pair to the named conversation. Failures
    /// are logged and absorbed: losing the transcript must not lose the
    /// answer.
    async fn persist_exchange(
        &self,
        request: &QueryRequest,
        answer: &str,
        metadata: &HashMap<String, Value>,
    ) {
        let Some(conversation_id) = request.conversation_id.as_deref() else {
            return;
        };

        let messages = vec![
            ConversationMessage::new(MessageRole::User, request.question.clone(), None),
            ConversationMessage::new(
                MessageRole::Assistant,
                answer.to_owned(),
                Some(metadata.clone()),
            ),
        ];

        if let Err(err) = self
            .metadata
            .append_messages(conversation_id, messages)
            .await
        {
            warn!(conversation_id, error = %err, "failed to persist conversation exchange");
        }
    }
}

/// Classifies a stage failure for the log stream: bad input is the caller's
/// problem, everything else is ours.
fn stage_error(stage: StageKind, err: AppError) -> AppError {
    if matches!(
        err,
        AppError::Validation(_) | AppError::NotFound(_) | AppError::NotInitialized(_)
    ) {
        debug!(stage = stage.label(), error = %err, "query rejected");
    } else {
        error!(stage = stage.label(), error = %err, "query stage failed");
    }
    err
}

/// Trace persisted with the assistant message and surfaced on the response:
/// which chunks backed the answer and the prompt they were folded into.
fn response_metadata(request: &GenerationRequest, used: &[SearchHit]) -> HashMap<String, Value> {
    let retrieved: Vec<Value> = used
        .iter()
        .map(|hit| {
            json!({
                "document_id": hit.chunk.document_id,
                "source": hit.chunk.source,
                "score": hit.score,
                "preview": hit.chunk.content.chars().take(200).collect::<String>(),
            })
        })
        .collect();

    let context_preview: String = request.context.chars().take(500).collect();

    HashMap::from([
        ("retrieved_documents".to_owned(), Value::Array(retrieved)),
        (
            "prompt".to_owned(),
            json!({
                "question": request.question,
                "context_preview": context_preview,
            }),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::metadata::LocalMetadataStore;
    use common::storage::types::chunk::Chunk;
    use common::utils::embedding::EmbeddingProvider;
    use crate::generation::ScriptedGenerator;

    struct Harness {
        orchestrator: QueryOrchestrator,
        metadata: MetadataStore,
        store: Arc<VectorStore>,
    }

    async fn harness(generator: Arc<dyn AnswerGenerator>) -> Harness {
        let embedder = Arc::new(EmbeddingProvider::new_hashed(128).expect("embedder"));
        let store = Arc::new(VectorStore::memory(embedder).await.expect("store"));
        let metadata = MetadataStore::local(
            LocalMetadataStore::open_in_memory()
                .await
                .expect("local metadata store"),
        );
        let orchestrator =
            QueryOrchestrator::new(Arc::clone(&store), metadata.clone(), generator);
        Harness {
            orchestrator,
            metadata,
            store,
        }
    }

    async fn seed_chunks(store: &VectorStore, texts: &[&str]) {
        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(index, text)| {
                Chunk::new("doc", index, (*text).to_owned(), "notes.md".to_owned())
            })
            .collect();
        let ids = chunks.iter().map(|chunk| chunk.chunk_id.clone()).collect();
        store.add(chunks, Some(ids)).await.expect("seed chunks");
    }

    fn request(question: &str) -> QueryRequest {
        QueryRequest::new(question.to_owned())
    }

    #[tokio::test]
    async fn empty_store_is_rejected_as_validation() {
        let harness = harness(Arc::new(ScriptedGenerator::answering("unused"))).await;

        let err = harness
            .orchestrator
            .query(&request("where is everything?"))
            .await
            .expect_err("must reject");

        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn malformed_request_is_rejected_before_retrieval() {
        let harness = harness(Arc::new(ScriptedGenerator::answering("unused"))).await;
        seed_chunks(&harness.store, &["some indexed text"]).await;

        let mut bad = request("valid question");
        bad.top_k = 0;

        let err = harness
            .orchestrator
            .query(&bad)
            .await
            .expect_err("must reject");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn overfetch_reports_counts_citations_and_trace() {
        let harness =
            harness(Arc::new(ScriptedGenerator::answering("grounded answer [1]"))).await;
        seed_chunks(
            &harness.store,
            &[
                "rust ownership moves values",
                "borrowing grants temporary access",
                "lifetimes bound references",
                "traits describe shared behavior",
                "closures capture their environment",
            ],
        )
        .await;

        let mut query = request("how does ownership work?");
        query.top_k = 2;

        let response = harness.orchestrator.query(&query).await.expect("response");

        assert_eq!(response.answer, "grounded answer [1]");
        assert_eq!(response.chunks_retrieved, 4);
        assert_eq!(response.chunks_used, 2);
        let numbers: Vec<usize> = response.citations.iter().map(|c| c.number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert!(response.related_questions.is_empty());
        assert!((0.0..=1.0).contains(&response.confidence));
        assert!(response.estimated_cost_usd > 0.0);

        let timings = response
            .metadata
            .get("stage_timings_ms")
            .and_then(Value::as_object)
            .expect("stage timings");
        for label in ["validate", "retrieve", "rerank", "generate", "persist"] {
            assert!(timings.contains_key(label), "missing {label} timing");
        }
        assert!(response.metadata.contains_key("retrieved_documents"));
    }

    #[tokio::test]
    async fn include_sources_false_omits_citations() {
        let harness = harness(Arc::new(ScriptedGenerator::answering("terse answer"))).await;
        seed_chunks(&harness.store, &["alpha text", "beta text"]).await;

        let mut query = request("what is alpha?");
        query.include_sources = false;

        let response = harness.orchestrator.query(&query).await.expect("response");
        assert!(response.citations.is_empty());
        assert!(response.chunks_used > 0);
    }

    #[tokio::test]
    async fn generator_failure_surfaces_as_backend_error() {
        let harness = harness(Arc::new(ScriptedGenerator::failing("model offline"))).await;
        seed_chunks(&harness.store, &["any text at all"]).await;

        let err = harness
            .orchestrator
            .query(&request("anything?"))
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::BackendOperation(_)));
    }

    #[tokio::test]
    async fn named_conversation_gains_the_exchange() {
        let harness = harness(Arc::new(ScriptedGenerator::answering("noted [1]"))).await;
        seed_chunks(&harness.store, &["conversation context chunk"]).await;

        let mut query = request("first question?");
        query.conversation_id = Some("conv-1".to_owned());

        let response = harness.orchestrator.query(&query).await.expect("response");
        assert_eq!(response.conversation_id.as_deref(), Some("conv-1"));

        let conversation = harness
            .metadata
            .get_conversation("conv-1")
            .await
            .expect("lookup")
            .expect("conversation exists");
        assert_eq!(conversation.message_count, 2);
        assert_eq!(
            conversation.messages.first().map(|m| m.content.as_str()),
            Some("first question?")
        );
        assert_eq!(
            conversation.messages.get(1).map(|m| m.content.as_str()),
            Some("noted [1]")
        );
        assert!(conversation
            .messages
            .get(1)
            .and_then(|m| m.metadata.as_ref())
            .is_some_and(|meta| meta.contains_key("retrieved_documents")));
        assert!(conversation.updated_at >= conversation.created_at);

        let mut follow_up = request("and a second?");
        follow_up.conversation_id = Some("conv-1".to_owned());
        harness
            .orchestrator
            .query(&follow_up)
            .await
            .expect("second response");

        let conversation = harness
            .metadata
            .get_conversation("conv-1")
            .await
            .expect("lookup")
            .expect("conversation exists");
        assert_eq!(conversation.message_count, 4);
    }

    #[tokio::test]
    async fn anonymous_query_persists_nothing() {
        let harness = harness(Arc::new(ScriptedGenerator::answering("stateless"))).await;
        seed_chunks(&harness.store, &["some chunk"]).await;

        harness
            .orchestrator
            .query(&request("no conversation here"))
            .await
            .expect("response");

        let conversations = harness
            .metadata
            .list_conversations()
            .await
            .expect("list conversations");
        assert!(conversations.is_empty());
    }
}

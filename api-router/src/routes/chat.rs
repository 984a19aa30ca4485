use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use common::storage::types::query::{Citation, QueryRequest, QueryResponse};
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;

use crate::api_state::ApiState;
use crate::error::ApiError;

/// Size of each answer slice sent over SSE. The answer is fully generated
/// before streaming starts; slicing is delivery only.
const STREAM_CHUNK_CHARS: usize = 50;

pub async fn query(
    State(state): State<ApiState>,
    Json(request): Json<QueryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state.orchestrator.query(&request).await?;
    Ok(Json(response))
}

/// One SSE `data:` payload. Partial frames carry an answer slice; the final
/// frame is empty-chunked and carries citations, confidence, and metadata.
/// Errors surface in-band as a terminal frame, never as an HTTP status.
#[derive(Serialize, Debug)]
struct StreamFrame {
    chunk: String,
    done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    citations: Option<Vec<Citation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<HashMap<String, Value>>,
}

impl StreamFrame {
    fn partial(chunk: String) -> Self {
        Self {
            chunk,
            done: false,
            citations: None,
            confidence: None,
            metadata: None,
        }
    }

    fn completed(response: QueryResponse) -> Self {
        Self {
            chunk: String::new(),
            done: true,
            citations: Some(response.citations),
            confidence: Some(response.confidence),
            metadata: Some(response.metadata),
        }
    }

    fn failed(message: String) -> Self {
        Self {
            chunk: format!("Error: {message}"),
            done: true,
            citations: None,
            confidence: None,
            metadata: None,
        }
    }
}

pub async fn query_stream(
    State(state): State<ApiState>,
    Json(request): Json<QueryRequest>,
) -> Sse<Pin<Box<dyn Stream<Item = Result<Event, axum::Error>> + Send>>> {
    let orchestrator = Arc::clone(&state.orchestrator);

    let event_stream = stream! {
        match orchestrator.query(&request).await {
            Ok(response) => {
                for slice in answer_slices(&response.answer) {
                    yield Event::default().json_data(&StreamFrame::partial(slice));
                }
                yield Event::default().json_data(&StreamFrame::completed(response));
            }
            Err(err) => {
                let message = ApiError::from(err).message();
                yield Event::default().json_data(&StreamFrame::failed(message));
            }
        }
        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(event_stream.boxed()).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Splits on character boundaries so multi-byte answers never tear.
fn answer_slices(answer: &str) -> Vec<String> {
    let chars: Vec<char> = answer.chars().collect();
    chars
        .chunks(STREAM_CHUNK_CHARS)
        .map(|piece| piece.iter().collect())
        .collect()
}

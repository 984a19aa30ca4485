use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api_state::ApiState;

/// Liveness probe: always returns 200 to indicate the process is running.
pub async fn live() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// Readiness probe: 200 once the vector store can answer queries, else 503.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    if state.vector_store.is_ready().await {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "checks": { "vector_store": "ok" }
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "checks": { "vector_store": "uninitialized" },
                "reason": "no documents indexed yet"
            })),
        )
    }
}

use axum::extract::{DefaultBodyLimit, FromRef};
use axum::routing::{get, post};
use axum::Router;

use api_state::ApiState;
use routes::chat::{query, query_stream};
use routes::conversations::{
    create_conversation, delete_conversation, get_conversation, list_conversations,
};
use routes::documents::{delete_document, get_document, list_documents, upload_document};
use routes::health::{live, ready};

pub mod api_state;
pub mod error;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Probe endpoints (for k8s/systemd checks)
    let probes = Router::new()
        .route("/health/live", get(live))
        .route("/health/ready", get(ready));

    let api = Router::new()
        .route(
            "/documents/upload",
            post(upload_document).layer(DefaultBodyLimit::max(
                app_state.config.upload_max_body_bytes,
            )),
        )
        .route("/documents", get(list_documents))
        .route(
            "/documents/{id}",
            get(get_document).delete(delete_document),
        )
        .route("/chat/query", post(query))
        .route("/chat/query/stream", post(query_stream))
        .route(
            "/conversations",
            post(create_conversation).get(list_conversations),
        )
        .route(
            "/conversations/{id}",
            get(get_conversation).delete(delete_conversation),
        );

    probes.merge(api)
}

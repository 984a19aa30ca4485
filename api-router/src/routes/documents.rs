use std::path::Path as FilePath;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use common::error::AppError;
use common::storage::types::document::{DocumentRecord, DocumentStatus};
use ingestion_pipeline::SUPPORTED_EXTENSIONS;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::info;

use crate::api_state::ApiState;
use crate::error::ApiError;

#[derive(Debug, TryFromMultipart)]
pub struct UploadParams {
    // Size is capped by the route-level body limit, not per field.
    #[form_data(limit = "unlimited")]
    pub file: FieldData<NamedTempFile>,
}

#[derive(Serialize, Debug)]
pub struct DocumentUploadResponse {
    pub document_id: String,
    pub filename: String,
    pub status: DocumentStatus,
    pub message: String,
    pub chunk_count: usize,
}

#[derive(Serialize, Debug)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentRecord>,
    pub total: usize,
}

#[derive(Serialize, Debug)]
pub struct DocumentDeleteResponse {
    pub document_id: String,
    pub deleted: bool,
    pub message: String,
}

/// Accepts one multipart file, runs it through the indexer inline, and
/// returns the resulting document record. Unsupported extensions are
/// rejected before any bytes leave the upload temp file.
pub async fn upload_document(
    State(state): State<ApiState>,
    TypedMultipart(input): TypedMultipart<UploadParams>,
) -> Result<impl IntoResponse, ApiError> {
    let filename = original_filename(&input.file);
    let extension = file_extension(&filename);

    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ApiError::Validation(format!(
            "unsupported file type '{filename}'; supported: {}",
            SUPPORTED_EXTENSIONS.join(", ")
        )));
    }

    info!(
        filename = %filename,
        content_type = input.file.metadata.content_type.as_deref().unwrap_or("unknown"),
        "received document upload"
    );

    // The multipart temp file has a random name without an extension, and
    // the loader dispatches on extension. Stage a correctly-named copy.
    let staging = tempfile::tempdir().map_err(AppError::from)?;
    let staged_path = staging.path().join(&filename);
    tokio::fs::copy(input.file.contents.path(), &staged_path)
        .await
        .map_err(AppError::from)?;

    let record = state.indexer.index(&staged_path, None).await?;

    Ok((
        StatusCode::OK,
        Json(DocumentUploadResponse {
            document_id: record.id.clone(),
            filename: record.filename.clone(),
            status: record.status,
            message: "Document uploaded and indexed successfully".to_string(),
            chunk_count: record.chunk_count,
        }),
    ))
}

pub async fn list_documents(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let documents = state.metadata.list_documents().await?;
    let total = documents.len();
    Ok(Json(DocumentListResponse { documents, total }))
}

pub async fn get_document(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .metadata
        .get_document(&document_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("document '{document_id}'")))?;
    Ok(Json(record))
}

/// Cascading delete: vector entries, the stored blob, and the metadata
/// record all go together.
pub async fn delete_document(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.indexer.delete_document(&document_id).await?;
    Ok(Json(DocumentDeleteResponse {
        document_id,
        deleted: true,
        message: "Document deleted successfully".to_string(),
    }))
}

/// Final path component of the client-supplied filename, so uploads cannot
/// escape the staging directory.
fn original_filename(file: &FieldData<NamedTempFile>) -> String {
    file.metadata
        .file_name
        .as_deref()
        .and_then(|name| FilePath::new(name).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string())
}

fn file_extension(filename: &str) -> String {
    FilePath::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

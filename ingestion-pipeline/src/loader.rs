use std::path::Path;

use common::error::AppError;
use tracing::debug;

/// File extensions the loader understands. Upload validation checks against
/// the same list so rejections happen before any bytes are stored.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "pdf"];

/// One extracted slice of document text. Plain text and Markdown files
/// produce a single unit; PDF extraction yields one unit per page with the
/// 1-based page number attached.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedUnit {
    pub text: String,
    pub page: Option<u32>,
}

/// Reads a document from disk and extracts its text, dispatching on the mime
/// type guessed from the file extension.
pub async fn load(path: &Path) -> Result<Vec<LoadedUnit>, AppError> {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    match mime.essence_str() {
        "text/plain" | "text/markdown" => {
            let bytes = tokio::fs::read(path).await?;
            Ok(vec![LoadedUnit {
                text: String::from_utf8_lossy(&bytes).into_owned(),
                page: None,
            }])
        }
        "application/pdf" => load_pdf(path).await,
        _ => {
            let extension = path
                .extension()
                .map(|ext| ext.to_string_lossy().into_owned())
                .unwrap_or_default();
            Err(AppError::Validation(format!(
                "unsupported file extension '{extension}'; supported: {}",
                SUPPORTED_EXTENSIONS.join(", ")
            )))
        }
    }
}

/// Extraction runs on the blocking pool since `pdf-extract` walks the whole
/// document synchronously. Blank pages are skipped but keep their page
/// numbering for the pages that remain.
async fn load_pdf(path: &Path) -> Result<Vec<LoadedUnit>, AppError> {
    let bytes = tokio::fs::read(path).await?;
    let pages =
        tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem_by_pages(&bytes))
            .await?
            .map_err(|err| {
                AppError::InternalError(format!("failed to extract text from PDF: {err}"))
            })?;

    let units: Vec<LoadedUnit> = pages
        .into_iter()
        .enumerate()
        .filter_map(|(index, text)| {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return None;
            }
            Some(LoadedUnit {
                text: trimmed.to_string(),
                page: u32::try_from(index.saturating_add(1)).ok(),
            })
        })
        .collect();

    debug!(pages = units.len(), path = %path.display(), "extracted pdf text");
    Ok(units)
}

#![allow(clippy::module_name_repetitions)]
use std::fmt;

use crate::stored_object;

#[derive(Deserialize, Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Indexed,
    Failed,
}

stored_object!(DocumentRecord, "document", {
    filename: String,
    file_type: String,
    file_size: u64,
    status: DocumentStatus,
    #[serde(default)]
    chunk_count: usize,
    #[serde(default)]
    blob_url: Option<String>,
    #[serde(default)]
    error_message: Option<String>
});

impl DocumentRecord {
    pub fn new(id: String, filename: String, file_type: String, file_size: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            filename,
            file_type,
            file_size,
            status: DocumentStatus::Uploaded,
            chunk_count: 0,
            blob_url: None,
            error_message: None,
        }
    }

    pub fn mark_processing(&mut self) {
        self.status = DocumentStatus::Processing;
        self.updated_at = Utc::now();
    }

    pub fn mark_indexed(&mut self, chunk_count: usize, blob_url: Option<String>) {
        self.status = DocumentStatus::Indexed;
        self.chunk_count = chunk_count;
        self.blob_url = blob_url;
        self.error_message = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.status = DocumentStatus::Failed;
        self.error_message = Some(message.into());
        self.updated_at = Utc::now();
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentStatus::Uploaded => write!(f, "uploaded"),
            DocumentStatus::Processing => write!(f, "processing"),
            DocumentStatus::Indexed => write!(f, "indexed"),
            DocumentStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = crate::error::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(DocumentStatus::Uploaded),
            "processing" => Ok(DocumentStatus::Processing),
            "indexed" => Ok(DocumentStatus::Indexed),
            "failed" => Ok(DocumentStatus::Failed),
            other => Err(crate::error::AppError::Validation(format!(
                "unknown document status '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DocumentRecord {
        DocumentRecord::new(
            "5eb63bbbe01eeed093cb22bb8f5acdc3".to_string(),
            "notes.txt".to_string(),
            "txt".to_string(),
            42,
        )
    }

    #[test]
    fn new_record_starts_uploaded() {
        let record = sample();
        assert_eq!(record.status, DocumentStatus::Uploaded);
        assert_eq!(record.chunk_count, 0);
        assert!(record.blob_url.is_none());
        assert!(record.error_message.is_none());
    }

    #[test]
    fn mark_indexed_sets_count_and_clears_error() {
        let mut record = sample();
        record.mark_failed("transient parse error");
        let failed_at = record.updated_at;

        record.mark_indexed(3, Some("documents/abc/notes.txt".to_string()));
        assert_eq!(record.status, DocumentStatus::Indexed);
        assert_eq!(record.chunk_count, 3);
        assert!(record.error_message.is_none());
        assert!(record.updated_at >= failed_at);
    }

    #[test]
    fn mark_failed_captures_message() {
        let mut record = sample();
        record.mark_processing();
        record.mark_failed("unsupported encoding");
        assert_eq!(record.status, DocumentStatus::Failed);
        assert_eq!(
            record.error_message.as_deref(),
            Some("unsupported encoding")
        );
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&DocumentStatus::Processing).expect("serialize");
        assert_eq!(json, "\"processing\"");
        let back: DocumentStatus = serde_json::from_str("\"indexed\"").expect("deserialize");
        assert_eq!(back, DocumentStatus::Indexed);
    }
}

use md5::{Digest, Md5};

/// Stable document id derived from the raw file bytes.
///
/// Content addressing means re-uploading identical bytes maps to the same
/// document, which is what allows natural de-duplication downstream.
pub fn document_id_from_bytes(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Fallback document id when file bytes are not available: hash of the path,
/// truncated to 16 hex characters.
pub fn document_id_from_path(path: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(path.as_bytes());
    hex::encode(hasher.finalize()).chars().take(16).collect()
}

/// Chunk id convention. Must stay reproducible from `(document_id, index)`
/// alone so deletion can rebuild ids from a stored chunk count.
pub fn chunk_id(document_id: &str, index: usize) -> String {
    format!("{document_id}_chunk_{index}")
}

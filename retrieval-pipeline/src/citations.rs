use common::storage::types::query::Citation;
use vector_store::SearchHit;

/// Longest excerpt carried in a citation before truncation kicks in.
const EXCERPT_MAX_CHARS: usize = 200;
/// Placeholder for attribution fields the chunk never carried.
const UNKNOWN: &str = "unknown";

/// Builds the citation list for the chunks that backed an answer. Numbers run
/// 1..n in the order the chunks were handed to the generator, matching the
/// `[Document n]` references the answer may contain.
pub fn build(used: &[SearchHit]) -> Vec<Citation> {
    used.iter()
        .enumerate()
        .map(|(index, hit)| Citation {
            number: index.saturating_add(1),
            document_id: known_or_unknown(&hit.chunk.document_id),
            document_name: known_or_unknown(&hit.chunk.source),
            chunk_id: known_or_unknown(&hit.chunk.chunk_id),
            page: hit.chunk.page,
            content: excerpt(&hit.chunk.content),
            score: hit.score.unwrap_or_default(),
        })
        .collect()
}

fn known_or_unknown(value: &str) -> String {
    if value.trim().is_empty() {
        UNKNOWN.to_owned()
    } else {
        value.to_owned()
    }
}

/// First [`EXCERPT_MAX_CHARS`] characters of the content, marked with a
/// trailing `...` when anything was cut. Counts characters, not bytes, so
/// multi-byte content never splits mid-character.
fn excerpt(content: &str) -> String {
    let mut cut: String = content.chars().take(EXCERPT_MAX_CHARS).collect();
    if content.chars().count() > EXCERPT_MAX_CHARS {
        cut.push_str("...");
    }
    cut
}

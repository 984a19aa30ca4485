use std::sync::Arc;

use common::error::AppError;
use common::utils::embedding::EmbeddingProvider;
use tracing::debug;
use vector_store::mmr::cosine_similarity;
use vector_store::SearchHit;

/// Fixed confidence when the answer was generated with no context at all.
const EMPTY_CONTEXT_CONFIDENCE: f32 = 0.1;
/// Utilization factor bounds: a fully used candidate pool scales alignment by
/// 1.0, an unused one by the floor.
const UTILIZATION_FLOOR: f32 = 0.7;
const UTILIZATION_SPAN: f32 = 0.3;

pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Scores how well an answer is grounded in the chunks it was given. There is
/// no ground truth, so the signal combines answer/chunk embedding alignment
/// with how much of the retrieved pool the answer actually drew on:
/// over-retrieving and using little should not inflate confidence.
pub struct ConfidenceCalculator {
    embedder: Arc<EmbeddingProvider>,
}

impl ConfidenceCalculator {
    pub fn new(embedder: Arc<EmbeddingProvider>) -> Self {
        Self { embedder }
    }

    /// Bounded to [0, 1] and non-decreasing in answer/context similarity when
    /// the counts are held fixed. An empty `used` slice is a defined outcome,
    /// not an error.
    pub async fn score(
        &self,
        query: &str,
        answer: &str,
        retrieved: usize,
        used: &[SearchHit],
    ) -> Result<f32, AppError> {
        if used.is_empty() {
            return Ok(EMPTY_CONTEXT_CONFIDENCE);
        }

        let answer_vector = self.embedder.embed(answer).await?;
        let contents: Vec<String> = used
            .iter()
            .map(|hit| hit.chunk.content.clone())
            .collect();
        let chunk_vectors = self.embedder.embed_batch(contents).await?;

        let total: f32 = chunk_vectors
            .iter()
            .map(|vector| cosine_similarity(&answer_vector, vector))
            .sum();
        let alignment = total / chunk_vectors.len() as f32;

        let utilization = used.len() as f32 / retrieved.max(1) as f32;
        let factor = UTILIZATION_FLOOR + UTILIZATION_SPAN * utilization;
        let confidence = clamp_unit(alignment * factor);

        debug!(
            query_chars = query.chars().count(),
            alignment,
            utilization,
            confidence,
            "scored answer confidence"
        );
        Ok(confidence)
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

    fn calculator() -> ConfidenceCalculator {
        let embedder = EmbeddingProvider::new_hashed(256).expect("embedder");
        ConfidenceCalculator::new(Arc::new(embedder))
    }

    #[test]
    fn clamp_unit_bounds_both_ends() {
        assert!((clamp_unit(1.7) - 1.0).abs() < f32::EPSILON);
        assert!(clamp_unit(-0.3).abs() < f32::EPSILON);
        assert!((clamp_unit(0.42) - 0.42).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn empty_used_chunks_yield_fixed_low_confidence() {
        let score = calculator()
            .score("question", "answer", 6, &[])
            .await
            .expect("score");
        assert!((score - 0.1).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn confidence_stays_in_unit_interval() {
        let used = vec![hit("rust ownership model"), hit("banana bread recipe")];
        let score = calculator()
            .score("q", "rust ownership model", 4, &used)
            .await
            .expect("score");
        assert!((0.0..=1.0).contains(&score));
    }

    #[tokio::test]
    async fn aligned_answer_outscores_unrelated_answer() {
        let used = vec![hit("the borrow checker enforces aliasing rules")];
        let calculator = calculator();

        let aligned = calculator
            .score("q", "the borrow checker enforces aliasing rules", 2, &used)
            .await
            .expect("score");
        let unrelated = calculator
            .score("q", "paris is the capital of france", 2, &used)
            .await
            .expect("score");

        assert!(aligned > unrelated);
    }

    #[tokio::test]
    async fn low_pool_utilization_drags_confidence_down() {
        let used = vec![hit("stable sorting keeps equal keys in order")];
        let calculator = calculator();

        let full_use = calculator
            .score("q", "stable sorting keeps equal keys in order", 1, &used)
            .await
            .expect("score");
        let sparse_use = calculator
            .score("q", "stable sorting keeps equal keys in order", 8, &used)
            .await
            .expect("score");

        assert!(full_use > sparse_use);
    }
}

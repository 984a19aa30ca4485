use common::error::AppError;
use common::utils::config::AppConfig;
use text_splitter::{Characters, ChunkConfig, TextSplitter};

/// Splits document text into retrieval-sized pieces. Sizing is by character
/// count; the splitter breaks at the most semantic boundary that fits, trying
/// paragraphs first, then lines, sentences, and words.
#[derive(Debug)]
pub struct Chunker {
    splitter: TextSplitter<Characters>,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, AppError> {
        let chunk_config = ChunkConfig::new(chunk_size)
            .with_overlap(chunk_overlap)
            .map_err(|err| AppError::Validation(format!("invalid chunk overlap: {err}")))?;
        Ok(Self {
            splitter: TextSplitter::new(chunk_config),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Ordered chunks of at most `chunk_size` characters each. Whitespace-only
    /// input yields no chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.splitter.chunks(text).map(str::to_owned).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_stays_whole() {
        let chunker = Chunker::new(1000, 200).expect("chunker");
        let chunks = chunker.split("a single short paragraph");
        assert_eq!(chunks, vec!["a single short paragraph".to_string()]);
    }

    #[test]
    fn long_text_splits_within_capacity_in_order() {
        let chunker = Chunker::new(40, 0).expect("chunker");
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu";

        let chunks = chunker.split(text);
        assert!(chunks.len() > 1);

        let mut last_start = 0;
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 40);
            let start = text.find(chunk.as_str()).expect("chunk comes from input");
            assert!(start >= last_start);
            last_start = start;
        }
    }

    #[test]
    fn paragraph_boundaries_win_over_capacity_fill() {
        let chunker = Chunker::new(30, 0).expect("chunker");
        let chunks = chunker.split("first paragraph here\n\nsecond paragraph here");
        assert_eq!(
            chunks,
            vec![
                "first paragraph here".to_string(),
                "second paragraph here".to_string()
            ]
        );
    }

    #[test]
    fn overlap_carries_context_between_chunks() {
        let chunker = Chunker::new(24, 10).expect("chunker");
        let chunks = chunker.split("alpha beta gamma delta epsilon zeta eta theta");
        assert!(chunks.len() > 1);

        let first = chunks.first().expect("first chunk");
        let second = chunks.get(1).expect("second chunk");
        let leading_word = second.split_whitespace().next().expect("word");
        assert!(first.contains(leading_word));
    }

    #[test]
    fn whitespace_only_input_yields_no_chunks() {
        let chunker = Chunker::new(100, 10).expect("chunker");
        assert!(chunker.split("").is_empty());
        assert!(chunker.split("   \n\t  ").is_empty());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let err = Chunker::new(100, 100).expect_err("should reject");
        assert!(matches!(err, AppError::Validation(_)));
    }
}

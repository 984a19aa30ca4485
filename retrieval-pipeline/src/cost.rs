/// Assumed token count of one context chunk for pricing purposes.
const TOKENS_PER_CHUNK: f64 = 512.0;
/// List prices per 1K tokens: embedding lookup, prompt side, completion side.
const EMBEDDING_COST_PER_1K: f64 = 0.000_13;
const PROMPT_COST_PER_1K: f64 = 0.03;
const COMPLETION_COST_PER_1K: f64 = 0.06;

/// Rough per-query cost in USD. Token counts are approximated from the chunk
/// count and answer length rather than metered usage, so this is an order of
/// magnitude, not a bill.
pub fn estimate(chunks_used: usize, answer_chars: usize) -> f64 {
    let context_kilotokens = chunks_used as f64 * TOKENS_PER_CHUNK / 1000.0;
    let embedding = context_kilotokens * EMBEDDING_COST_PER_1K;
    let prompt = context_kilotokens * PROMPT_COST_PER_1K;
    let completion = answer_chars as f64 / 1000.0 * COMPLETION_COST_PER_1K;
    embedding + prompt + completion
}

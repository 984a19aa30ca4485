use crate::VectorEntry;

/// Cosine similarity of two vectors; 0.0 when either has zero norm or the
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Maximal marginal relevance selection: greedily picks `k` candidates
/// trading off query relevance against redundancy with already-picked
/// entries. `lambda` = 1.0 degenerates to pure nearest-neighbor order.
/// Deterministic for a fixed candidate order; ties keep the earlier
/// candidate.
pub fn select_diverse(
    query: &[f32],
    candidates: Vec<VectorEntry>,
    k: usize,
    lambda: f32,
) -> Vec<VectorEntry> {
    if k == 0 || candidates.is_empty() {
        return Vec::new();
    }

    let relevance: Vec<f32> = candidates
        .iter()
        .map(|entry| cosine_similarity(query, &entry.vector))
        .collect();

    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut picked: Vec<usize> = Vec::with_capacity(k.min(candidates.len()));

    while picked.len() < k && !remaining.is_empty() {
        let mut best_position = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (position, &candidate_idx) in remaining.iter().enumerate() {
            let redundancy = picked
                .iter()
                .map(|&picked_idx| {
                    let picked_vec = candidates
                        .get(picked_idx)
                        .map(|entry| entry.vector.as_slice())
                        .unwrap_or_default();
                    let candidate_vec = candidates
                        .get(candidate_idx)
                        .map(|entry| entry.vector.as_slice())
                        .unwrap_or_default();
                    cosine_similarity(candidate_vec, picked_vec)
                })
                .fold(0.0f32, f32::max);

            let rel = relevance.get(candidate_idx).copied().unwrap_or_default();
            let score = lambda * rel - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_position = position;
            }
        }

        picked.push(remaining.remove(best_position));
    }

    // Preserve pick order, not candidate order.
    let mut by_index: Vec<Option<VectorEntry>> = candidates.into_iter().map(Some).collect();
    picked
        .into_iter()
        .filter_map(|idx| by_index.get_mut(idx).and_then(Option::take))
        .collect()
}

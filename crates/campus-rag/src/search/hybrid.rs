use crate::types::RetrievalCandidate;

/// Weighted combination of semantic similarity and keyword relevance.
pub fn hybrid_score(
    similarity_score: f32,
    keyword_rank: f32,
    semantic_weight: f32,
    keyword_weight: f32,
) -> f32 {
    semantic_weight * similarity_score + keyword_weight * keyword_rank
}

/// Divide every score by the best one so the top hit gets 1.0.
/// Raw BM25 is unbounded, which makes a fixed threshold meaningless.
pub fn normalize_by_max<T: Clone>(results: &[(T, f32)]) -> Vec<(T, f32)> {
    let max = results.iter().map(|(_, s)| *s).fold(0.0f32, f32::max);
    if max <= 0.0 {
        return results.iter().map(|(id, _)| (id.clone(), 0.0)).collect();
    }
    results
        .iter()
        .map(|(id, s)| (id.clone(), (s / max).clamp(0.0, 1.0)))
        .collect()
}

/// Drop candidates whose hybrid score is below `threshold`, preserving order.
pub fn apply_threshold(
    candidates: Vec<RetrievalCandidate>,
    threshold: f32,
) -> Vec<RetrievalCandidate> {
    let pre_filter = candidates.len();
    let kept: Vec<RetrievalCandidate> = candidates
        .into_iter()
        .filter(|c| c.hybrid_score >= threshold)
        .collect();
    tracing::info!(
        pre_filter = pre_filter,
        post_filter = kept.len(),
        threshold = threshold,
        top_score = kept.first().map(|c| c.hybrid_score).unwrap_or(0.0),
        "Score threshold filter"
    );
    kept
}

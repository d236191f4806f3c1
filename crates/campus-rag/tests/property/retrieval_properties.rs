use campus_rag::agent::{Action, QueryPlan};
use campus_rag::embeddings::cosine_similarity;
use campus_rag::rag::context_compiler::truncate_chars;
use campus_rag::reranking::DiversitySelector;
use campus_rag::search::{apply_threshold, normalize_by_max};
use campus_rag::{ChunkMetadata, RetrievalCandidate};
use proptest::prelude::*;
use std::collections::HashSet;

fn vectors() -> impl Strategy<Value = Vec<Vec<f32>>> {
    prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 3), 1..12)
}

fn candidate(score: f32) -> RetrievalCandidate {
    RetrievalCandidate {
        content: format!("chunk {}", score),
        metadata: ChunkMetadata::default(),
        similarity_score: score,
        keyword_rank: score,
        hybrid_score: score,
        embedding: None,
    }
}

fn action() -> impl Strategy<Value = Action> {
    prop::sample::select(Action::ALL.to_vec())
}

proptest! {
    #[test]
    fn mmr_selects_min_k_n_distinct(
        candidates in vectors(),
        query in prop::collection::vec(-1.0f32..1.0, 3),
        lambda in 0.0f32..=1.0,
        k in 0usize..15,
    ) {
        let order = DiversitySelector::new(lambda).select_indices(&query, &candidates, k);
        prop_assert_eq!(order.len(), k.min(candidates.len()));
        let unique: HashSet<usize> = order.iter().copied().collect();
        prop_assert_eq!(unique.len(), order.len());
        prop_assert!(order.iter().all(|&i| i < candidates.len()));
    }

    #[test]
    fn mmr_first_pick_is_most_relevant(
        candidates in vectors(),
        query in prop::collection::vec(-1.0f32..1.0, 3),
        lambda in 0.0f32..=1.0,
    ) {
        let k = candidates.len().saturating_sub(1);
        prop_assume!(k > 0);
        let order = DiversitySelector::new(lambda).select_indices(&query, &candidates, k);
        let first = cosine_similarity(&candidates[order[0]], &query);
        for c in &candidates {
            prop_assert!(first + 1e-6 >= cosine_similarity(c, &query));
        }
    }

    #[test]
    fn mmr_is_deterministic(
        candidates in vectors(),
        query in prop::collection::vec(-1.0f32..1.0, 3),
        k in 1usize..6,
    ) {
        let selector = DiversitySelector::default();
        prop_assert_eq!(
            selector.select_indices(&query, &candidates, k),
            selector.select_indices(&query, &candidates, k)
        );
    }

    #[test]
    fn mmr_keeps_input_order_when_k_covers_all(candidates in vectors(), extra in 0usize..4) {
        let n = candidates.len();
        let order = DiversitySelector::default().select_indices(&[1.0, 0.0, 0.0], &candidates, n + extra);
        prop_assert_eq!(order, (0..n).collect::<Vec<_>>());
    }

    #[test]
    fn threshold_keeps_exactly_scores_at_or_above(
        scores in prop::collection::vec(0.0f32..1.0, 0..20),
        threshold in 0.0f32..1.0,
    ) {
        let kept = apply_threshold(scores.iter().map(|&s| candidate(s)).collect(), threshold);
        let expected: Vec<f32> = scores.iter().copied().filter(|&s| s >= threshold).collect();
        let actual: Vec<f32> = kept.iter().map(|c| c.hybrid_score).collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn normalized_keyword_ranks_are_bounded(scores in prop::collection::vec(0.0f32..50.0, 0..20)) {
        let indexed: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
        for (_, rank) in normalize_by_max(&indexed) {
            prop_assert!((0.0..=1.0).contains(&rank));
        }
    }

    #[test]
    fn plan_always_ends_with_single_answer(actions in prop::collection::vec(action(), 0..10)) {
        let plan = QueryPlan::new(actions);
        prop_assert_eq!(plan.actions().last(), Some(&Action::Answer));
        let unique: HashSet<Action> = plan.actions().iter().copied().collect();
        prop_assert_eq!(unique.len(), plan.actions().len());
    }

    #[test]
    fn truncation_respects_limit(text in ".{0,300}", max in 0usize..200) {
        let out = truncate_chars(&text, max);
        prop_assert!(out.chars().count() <= max + 3);
        if text.chars().count() <= max {
            prop_assert_eq!(out, text);
        }
    }
}

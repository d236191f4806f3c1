//! Maximal Marginal Relevance selection.
//!
//! MMR = λ · Sim(D, Q) − (1 − λ) · max[Sim(D, Di)]
//! where D is a candidate, Q the query and Di the already-selected items
//! (Carbonell & Goldstein, 1998).

use crate::embeddings::cosine_similarity;

pub const DEFAULT_LAMBDA: f32 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct DiversitySelector {
    /// Balance between relevance (1.0) and diversity (0.0)
    lambda: f32,
}

impl Default for DiversitySelector {
    fn default() -> Self {
        Self::new(DEFAULT_LAMBDA)
    }
}

impl DiversitySelector {
    pub fn new(lambda: f32) -> Self {
        Self {
            lambda: lambda.clamp(0.0, 1.0),
        }
    }

    pub fn lambda(&self) -> f32 {
        self.lambda
    }

    /// Indices into `candidates` in selection order.
    ///
    /// Returns `0..n` untouched when `k >= n`. Otherwise the first index is the
    /// most query-relevant candidate and each following one maximises the MMR
    /// score. Ties go to the earlier candidate.
    pub fn select_indices(&self, query: &[f32], candidates: &[Vec<f32>], k: usize) -> Vec<usize> {
        let n = candidates.len();
        if k >= n {
            return (0..n).collect();
        }
        if k == 0 {
            return Vec::new();
        }

        let relevance: Vec<f32> = candidates
            .iter()
            .map(|c| cosine_similarity(c, query))
            .collect();

        let mut selected = Vec::with_capacity(k);
        let mut remaining: Vec<usize> = (0..n).collect();
        // Max similarity of each candidate to anything selected so far.
        let mut redundancy = vec![f32::NEG_INFINITY; n];

        let seed_pos = argmax(remaining.iter().map(|&i| relevance[i]));
        let mut last = remaining.remove(seed_pos);
        selected.push(last);

        while selected.len() < k && !remaining.is_empty() {
            for &i in &remaining {
                let sim = cosine_similarity(&candidates[i], &candidates[last]);
                if sim > redundancy[i] {
                    redundancy[i] = sim;
                }
            }

            let best_pos = argmax(remaining.iter().map(|&i| {
                self.lambda * relevance[i] - (1.0 - self.lambda) * redundancy[i]
            }));
            last = remaining.remove(best_pos);
            selected.push(last);
        }

        selected
    }

    /// Reorder `items` by [`select_indices`](Self::select_indices), keeping at most `k`.
    /// `embeddings[i]` belongs to `items[i]`.
    pub fn select<T>(&self, query: &[f32], items: Vec<T>, embeddings: &[Vec<f32>], k: usize) -> Vec<T> {
        debug_assert_eq!(items.len(), embeddings.len());
        let order = self.select_indices(query, embeddings, k);
        let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
        order
            .into_iter()
            .filter_map(|i| slots.get_mut(i).and_then(Option::take))
            .collect()
    }
}

/// Position of the first maximum; NaN never wins.
fn argmax(scores: impl Iterator<Item = f32>) -> usize {
    let mut best_pos = 0;
    let mut best = f32::NEG_INFINITY;
    for (pos, score) in scores.enumerate() {
        if score > best {
            best = score;
            best_pos = pos;
        }
    }
    best_pos
}

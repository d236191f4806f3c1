//! Ephemeral similarity index over a user's own documents.
//!
//! Built per request from a handful of files, searched once, then dropped.
//! Distances are squared L2 as reported by a flat L2 index and converted with
//! `similarity = 1 / (1 + distance)`.

use anyhow::{anyhow, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use std::cmp::Ordering;

use crate::embeddings::EmbeddingModel;
use crate::types::{RankedUserDocument, UserDocument};

/// Characters of each document sent to the embedding service.
const EMBED_CHAR_LIMIT: usize = 8000;

/// Exhaustive squared-L2 index over row vectors.
pub struct FlatL2Index {
    vectors: Array2<f32>,
}

impl FlatL2Index {
    pub fn build(vectors: &[Vec<f32>]) -> Result<Self> {
        let dim = vectors
            .first()
            .map(Vec::len)
            .ok_or_else(|| anyhow!("Cannot build an index without vectors"))?;
        if dim == 0 {
            return Err(anyhow!("Cannot index zero-dimensional vectors"));
        }
        if let Some(bad) = vectors.iter().position(|v| v.len() != dim) {
            return Err(anyhow!(
                "Vector {} has dimension {}, expected {}",
                bad,
                vectors[bad].len(),
                dim
            ));
        }

        let flat: Vec<f32> = vectors.iter().flatten().copied().collect();
        let vectors = Array2::from_shape_vec((vectors.len(), dim), flat)?;
        Ok(Self { vectors })
    }

    pub fn len(&self) -> usize {
        self.vectors.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(row, squared distance)` for the `k` nearest rows, nearest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.vectors.ncols() {
            return Err(anyhow!(
                "Query dimension {} does not match index dimension {}",
                query.len(),
                self.vectors.ncols()
            ));
        }

        let query = ArrayView1::from(query);
        let distances: Array1<f32> = self
            .vectors
            .axis_iter(Axis(0))
            .map(|row| {
                let diff = &row - &query;
                diff.dot(&diff)
            })
            .collect();

        let mut hits: Vec<(usize, f32)> = distances.into_iter().enumerate().collect();
        hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }
}

pub fn distance_to_similarity(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

/// Ranks user documents against the question embedding.
pub struct UserDocumentIndex<'a> {
    embeddings: &'a dyn EmbeddingModel,
    similarity_threshold: f32,
}

impl<'a> UserDocumentIndex<'a> {
    pub fn new(embeddings: &'a dyn EmbeddingModel, similarity_threshold: f32) -> Self {
        Self {
            embeddings,
            similarity_threshold,
        }
    }

    /// Top `k` documents above the threshold, ordered by similarity
    /// descending then document type ascending. Failures yield an empty list.
    pub async fn rank(
        &self,
        query_embedding: &[f32],
        documents: Vec<UserDocument>,
        k: usize,
    ) -> Vec<RankedUserDocument> {
        if documents.is_empty() || k == 0 {
            return Vec::new();
        }

        match self.try_rank(query_embedding, documents, k).await {
            Ok(ranked) => ranked,
            Err(e) => {
                tracing::warn!(error = %e, "User document ranking failed, continuing without user documents");
                Vec::new()
            }
        }
    }

    async fn try_rank(
        &self,
        query_embedding: &[f32],
        documents: Vec<UserDocument>,
        k: usize,
    ) -> Result<Vec<RankedUserDocument>> {
        let texts: Vec<String> = documents
            .iter()
            .map(|d| d.text.chars().take(EMBED_CHAR_LIMIT).collect())
            .collect();
        let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = self.embeddings.embed_documents(&text_refs).await?;

        let index = FlatL2Index::build(&vectors)?;
        let hits = index.search(query_embedding, k)?;

        let mut slots: Vec<Option<UserDocument>> = documents.into_iter().map(Some).collect();
        let mut ranked: Vec<RankedUserDocument> = hits
            .into_iter()
            .filter_map(|(row, distance)| {
                let similarity = distance_to_similarity(distance);
                if similarity < self.similarity_threshold {
                    return None;
                }
                slots
                    .get_mut(row)
                    .and_then(Option::take)
                    .map(|document| RankedUserDocument { document, similarity })
            })
            .collect();

        sort_ranked(&mut ranked);
        tracing::debug!(kept = ranked.len(), threshold = self.similarity_threshold, "Ranked user documents");
        Ok(ranked)
    }
}

/// Similarity descending, then document type ascending.
pub fn sort_ranked(ranked: &mut [RankedUserDocument]) {
    ranked.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.document.doc_type.cmp(&b.document.doc_type))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Maps known document texts to fixed vectors.
    struct TableModel;

    #[async_trait]
    impl EmbeddingModel for TableModel {
        async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            self.embed_document(text).await
        }

        async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
            match text {
                "transcript" => Ok(vec![1.0, 0.0]),
                "cv" => Ok(vec![1.0, 0.0]),
                "passport" => Ok(vec![0.0, 1.0]),
                "far away" => Ok(vec![-1.0, 0.0]),
                "broken" => Err(anyhow!("embedding service down")),
                _ => Ok(vec![0.5, 0.5]),
            }
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn doc(doc_type: &str, text: &str) -> UserDocument {
        UserDocument {
            doc_type: doc_type.to_string(),
            filename: format!("{}.txt", doc_type),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_flat_index_nearest_first() {
        let index = FlatL2Index::build(&[vec![0.0, 1.0], vec![1.0, 0.0], vec![0.9, 0.1]]).unwrap();
        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0], (1, 0.0));
        assert_eq!(hits[1].0, 2);
        assert!((hits[1].1 - 0.02).abs() < 1e-6);
    }

    #[test]
    fn test_flat_index_rejects_bad_dimensions() {
        assert!(FlatL2Index::build(&[]).is_err());
        assert!(FlatL2Index::build(&[vec![1.0], vec![1.0, 2.0]]).is_err());
        let index = FlatL2Index::build(&[vec![1.0, 0.0]]).unwrap();
        assert!(index.search(&[1.0], 1).is_err());
    }

    #[test]
    fn test_distance_to_similarity() {
        assert_eq!(distance_to_similarity(0.0), 1.0);
        assert_eq!(distance_to_similarity(1.0), 0.5);
        assert_eq!(distance_to_similarity(-0.0001), 1.0);
    }

    #[tokio::test]
    async fn test_ties_sorted_by_doc_type() {
        let index = UserDocumentIndex::new(&TableModel, 0.3);
        for _ in 0..3 {
            let ranked = index
                .rank(
                    &[1.0, 0.0],
                    vec![doc("transcript", "transcript"), doc("cv", "cv"), doc("passport", "passport")],
                    3,
                )
                .await;
            let types: Vec<&str> = ranked.iter().map(|r| r.document.doc_type.as_str()).collect();
            assert_eq!(types, vec!["cv", "transcript", "passport"]);
            assert_eq!(ranked[0].similarity, 1.0);
        }
    }

    #[tokio::test]
    async fn test_threshold_filters_distant_documents() {
        let index = UserDocumentIndex::new(&TableModel, 0.3);
        let ranked = index
            .rank(&[1.0, 0.0], vec![doc("cv", "cv"), doc("other", "far away")], 5)
            .await;
        // squared distance 4.0 -> similarity 0.2
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].document.doc_type, "cv");
    }

    #[tokio::test]
    async fn test_failure_yields_empty() {
        let index = UserDocumentIndex::new(&TableModel, 0.3);
        let ranked = index.rank(&[1.0, 0.0], vec![doc("cv", "broken")], 5).await;
        assert!(ranked.is_empty());

        let ranked = index.rank(&[1.0, 0.0, 0.0], vec![doc("cv", "cv")], 5).await;
        assert!(ranked.is_empty());
    }
}

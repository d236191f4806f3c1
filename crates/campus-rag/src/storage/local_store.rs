use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;

use super::{level_matches, KnowledgeStore, RetrievalRequest};
use crate::embeddings::{cosine_similarity, EmbeddingModel};
use crate::processing::{ProgramChunker, ProgramRecord};
use crate::search::hybrid::{hybrid_score, normalize_by_max};
use crate::search::TextSearch;
use crate::types::{Chunk, ProgramSummary, RetrievalCandidate};

/// In-process knowledge store: chunk vectors in memory plus a BM25 index.
///
/// Produces the same row shape as the RPC store. `keyword_rank` is BM25
/// divided by the best BM25 score of the query, so both signals sit in [0, 1].
pub struct LocalKnowledgeStore {
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
    text_search: TextSearch,
}

impl LocalKnowledgeStore {
    /// Build from chunks whose vectors were computed elsewhere.
    pub fn from_parts(chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<Self> {
        if chunks.len() != vectors.len() {
            return Err(anyhow!(
                "Chunk/vector count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            ));
        }

        let docs: Vec<(&str, &str)> = chunks
            .iter()
            .map(|c| (c.content.as_str(), c.metadata.section.as_deref().unwrap_or("")))
            .collect();
        let text_search = TextSearch::build(&docs)?;

        tracing::info!(chunks = chunks.len(), "Built local knowledge store");
        Ok(Self {
            chunks,
            vectors,
            text_search,
        })
    }

    /// Embed every chunk with `embeddings` and build the store.
    pub async fn build(chunks: Vec<Chunk>, embeddings: &dyn EmbeddingModel) -> Result<Self> {
        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let vectors = embeddings.embed_documents(&texts).await?;
        Self::from_parts(chunks, vectors)
    }

    /// Chunk crawled program records and embed them.
    pub async fn from_records(
        records: &[ProgramRecord],
        chunker: &ProgramChunker,
        embeddings: &dyn EmbeddingModel,
    ) -> Result<Self> {
        let chunks: Vec<Chunk> = records.iter().flat_map(|r| chunker.chunk_record(r)).collect();
        tracing::info!(records = records.len(), chunks = chunks.len(), "Chunked program catalog");
        Self::build(chunks, embeddings).await
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[async_trait]
impl KnowledgeStore for LocalKnowledgeStore {
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<RetrievalCandidate>> {
        if self.chunks.is_empty() || request.match_count == 0 {
            return Ok(Vec::new());
        }

        let bm25 = self
            .text_search
            .search(&request.keyword_query, self.text_search.count())?;
        let keyword_ranks = normalize_by_max(&bm25);
        let mut keyword = vec![0.0f32; self.chunks.len()];
        for (ord, rank) in keyword_ranks {
            if let Some(slot) = keyword.get_mut(ord) {
                *slot = rank;
            }
        }

        let mut rows: Vec<RetrievalCandidate> = self
            .chunks
            .iter()
            .zip(&self.vectors)
            .zip(keyword)
            .filter(|((chunk, _), _)| level_matches(request.degree_level, chunk.metadata.degree_level))
            .map(|((chunk, vector), keyword_rank)| {
                let similarity_score =
                    cosine_similarity(&request.query_embedding, vector).clamp(0.0, 1.0);
                RetrievalCandidate {
                    content: chunk.content.clone(),
                    metadata: chunk.metadata.clone(),
                    similarity_score,
                    keyword_rank,
                    hybrid_score: hybrid_score(
                        similarity_score,
                        keyword_rank,
                        request.semantic_weight,
                        request.keyword_weight,
                    ),
                    embedding: Some(vector.clone()),
                }
            })
            .collect();

        // Stable sort keeps insertion order for equal scores.
        rows.sort_by(|a, b| {
            b.hybrid_score
                .partial_cmp(&a.hybrid_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rows.truncate(request.match_count);
        Ok(rows)
    }

    async fn list_programs(&self) -> Result<Vec<ProgramSummary>> {
        let programs: BTreeSet<ProgramSummary> = self
            .chunks
            .iter()
            .filter(|c| !c.metadata.degree.is_empty())
            .map(|c| ProgramSummary {
                degree: c.metadata.degree.clone(),
                degree_level: c.metadata.degree_level,
                university: Some(c.metadata.university.clone()).filter(|u| !u.is_empty()),
            })
            .collect();
        Ok(programs.into_iter().collect())
    }
}

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::config::SearchConfig;
use crate::embeddings::{normalize, EmbeddingModel};
use crate::rag::retrieval_decision::{IntentClassifier, QueryAnalyzer};
use crate::reranking::DiversitySelector;
use crate::search::hybrid::apply_threshold;
use crate::storage::{KnowledgeStore, RetrievalRequest};
use crate::types::{ChunkMetadata, DegreeLevel, ProgramSummary, RetrievalCandidate};

/// Chunk type of the synthetic document produced by the list-programs shortcut.
pub const PROGRAM_LIST_TYPE: &str = "program_list";

/// Knowledge-base retrieval: store query, threshold, diversity selection.
///
/// Every failure (store, embedding, timeout) is logged and folded into an
/// empty result; the caller treats empty as "no evidence".
pub struct HybridRetriever {
    store: Arc<dyn KnowledgeStore>,
    embeddings: Arc<dyn EmbeddingModel>,
    analyzer: QueryAnalyzer,
    intent: Arc<dyn IntentClassifier>,
    config: SearchConfig,
    store_timeout: Duration,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embeddings: Arc<dyn EmbeddingModel>,
        analyzer: QueryAnalyzer,
        intent: Arc<dyn IntentClassifier>,
        config: SearchConfig,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            embeddings,
            analyzer,
            intent,
            config,
            store_timeout,
        }
    }

    /// Final knowledge-base evidence for a question: at most `top_k` chunks,
    /// each with `hybrid_score >= similarity_threshold`.
    ///
    /// Without a query embedding only the list-programs shortcut can answer.
    pub async fn search(
        &self,
        question: &str,
        query_embedding: Option<&[f32]>,
        degree_level: Option<DegreeLevel>,
    ) -> Vec<RetrievalCandidate> {
        if self.intent.is_program_listing(question) {
            tracing::info!(degree_level = ?degree_level, "Program listing intent, bypassing vector search");
            return self.program_listing(degree_level).await;
        }
        let Some(query_embedding) = query_embedding else {
            tracing::warn!("No query embedding, skipping knowledge base search");
            return Vec::new();
        };

        let candidates = self.retrieve(question, query_embedding, degree_level).await;
        if candidates.is_empty() {
            return candidates;
        }
        self.diversify(query_embedding, candidates).await
    }

    /// Over-fetched, thresholded candidates in store order.
    pub async fn retrieve(
        &self,
        question: &str,
        query_embedding: &[f32],
        degree_level: Option<DegreeLevel>,
    ) -> Vec<RetrievalCandidate> {
        let request = RetrievalRequest {
            query_embedding: query_embedding.to_vec(),
            keyword_query: self.analyzer.expand_keyword_query(question),
            match_count: self.config.candidate_count(),
            semantic_weight: self.config.semantic_weight,
            keyword_weight: self.config.keyword_weight,
            degree_level,
        };

        let rows = match tokio::time::timeout(self.store_timeout, self.store.retrieve(&request)).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Knowledge store query failed, treating as zero results");
                return Vec::new();
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.store_timeout.as_secs(),
                    "Knowledge store query timed out, treating as zero results"
                );
                return Vec::new();
            }
        };

        tracing::info!(
            rows = rows.len(),
            match_count = request.match_count,
            degree_level = ?degree_level,
            expanded = request.keyword_query.len() != question.len(),
            "Hybrid search candidates"
        );

        apply_threshold(rows, self.config.similarity_threshold)
    }

    /// MMR down to `top_k`. Falls back to the first `top_k` in score order
    /// when candidate vectors are unavailable.
    async fn diversify(
        &self,
        query_embedding: &[f32],
        mut candidates: Vec<RetrievalCandidate>,
    ) -> Vec<RetrievalCandidate> {
        let k = self.config.top_k;
        if candidates.len() <= k {
            return candidates;
        }

        match self.candidate_vectors(&candidates).await {
            Ok(vectors) => {
                let selector = DiversitySelector::new(self.config.mmr_lambda);
                let selected = selector.select(query_embedding, candidates, &vectors, k);
                tracing::debug!(selected = selected.len(), lambda = selector.lambda(), "MMR selection complete");
                selected
            }
            Err(e) => {
                tracing::warn!(error = %e, "Candidate embedding failed, skipping diversity selection");
                candidates.truncate(k);
                candidates
            }
        }
    }

    /// Unit-length vectors for every candidate, embedding the ones the store
    /// did not return vectors for.
    async fn candidate_vectors(&self, candidates: &[RetrievalCandidate]) -> Result<Vec<Vec<f32>>> {
        let missing: Vec<&str> = candidates
            .iter()
            .filter(|c| c.embedding.is_none())
            .map(|c| c.content.as_str())
            .collect();
        let fresh = if missing.is_empty() {
            Vec::new()
        } else {
            self.embeddings.embed_documents(&missing).await?
        };
        let mut fresh = fresh.into_iter();

        candidates
            .iter()
            .map(|c| {
                let mut vector = match &c.embedding {
                    Some(v) => v.clone(),
                    None => fresh
                        .next()
                        .ok_or_else(|| anyhow!("Embedding model returned too few vectors"))?,
                };
                normalize(&mut vector);
                Ok(vector)
            })
            .collect()
    }

    /// List-programs shortcut: one synthetic document enumerating distinct
    /// (degree, degree level) pairs with a count.
    pub async fn program_listing(&self, degree_level: Option<DegreeLevel>) -> Vec<RetrievalCandidate> {
        let programs = match tokio::time::timeout(self.store_timeout, self.store.list_programs()).await {
            Ok(Ok(programs)) => programs,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Program listing failed, treating as zero results");
                return Vec::new();
            }
            Err(_) => {
                tracing::warn!("Program listing timed out, treating as zero results");
                return Vec::new();
            }
        };

        match build_program_summary(&programs, degree_level) {
            Some(candidate) => vec![candidate],
            None => Vec::new(),
        }
    }
}

/// Render the synthetic listing document; `None` when nothing matches.
pub fn build_program_summary(
    programs: &[ProgramSummary],
    degree_level: Option<DegreeLevel>,
) -> Option<RetrievalCandidate> {
    let distinct: BTreeSet<(String, Option<DegreeLevel>)> = programs
        .iter()
        .filter(|p| !p.degree.trim().is_empty())
        .filter(|p| degree_level.is_none() || p.degree_level == degree_level)
        .map(|p| (p.degree.trim().to_string(), p.degree_level))
        .collect();
    if distinct.is_empty() {
        return None;
    }

    let scope = match degree_level {
        Some(level) => format!("{} programs", level),
        None => "programs".to_string(),
    };
    let mut content = format!("Available {} ({} in total):\n", scope, distinct.len());
    for (degree, level) in &distinct {
        match level {
            Some(level) => content.push_str(&format!("- {} ({})\n", degree, level)),
            None => content.push_str(&format!("- {}\n", degree)),
        }
    }

    Some(RetrievalCandidate {
        content: content.trim_end().to_string(),
        metadata: ChunkMetadata {
            source: "program catalog".to_string(),
            degree_level,
            chunk_type: PROGRAM_LIST_TYPE.to_string(),
            ..Default::default()
        },
        similarity_score: 1.0,
        keyword_rank: 1.0,
        hybrid_score: 1.0,
        embedding: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VocabularyConfig;
    use crate::rag::retrieval_decision::KeywordIntentClassifier;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct FakeStore {
        rows: Vec<RetrievalCandidate>,
        programs: Vec<ProgramSummary>,
        fail: bool,
        last_request: Mutex<Option<RetrievalRequest>>,
    }

    #[async_trait]
    impl KnowledgeStore for FakeStore {
        async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<RetrievalCandidate>> {
            *self.last_request.lock() = Some(request.clone());
            if self.fail {
                return Err(anyhow!("connection refused"));
            }
            Ok(self.rows.iter().take(request.match_count).cloned().collect())
        }

        async fn list_programs(&self) -> Result<Vec<ProgramSummary>> {
            if self.fail {
                return Err(anyhow!("connection refused"));
            }
            Ok(self.programs.clone())
        }
    }

    struct AxisModel;

    #[async_trait]
    impl EmbeddingModel for AxisModel {
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
        async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
            Ok(if text.contains("fees") { vec![0.0, 1.0] } else { vec![1.0, 0.0] })
        }
        fn dimension(&self) -> usize {
            2
        }
    }

    fn row(content: &str, score: f32) -> RetrievalCandidate {
        RetrievalCandidate {
            content: content.to_string(),
            metadata: ChunkMetadata::default(),
            similarity_score: score,
            keyword_rank: score,
            hybrid_score: score,
            embedding: None,
        }
    }

    fn retriever(store: FakeStore, top_k: usize) -> (HybridRetriever, Arc<FakeStore>) {
        let store = Arc::new(store);
        let vocabulary = VocabularyConfig::default();
        let config = SearchConfig {
            top_k,
            ..Default::default()
        };
        let retriever = HybridRetriever::new(
            store.clone(),
            Arc::new(AxisModel),
            QueryAnalyzer::new(&vocabulary),
            Arc::new(KeywordIntentClassifier::new(&vocabulary)),
            config,
            Duration::from_secs(5),
        );
        (retriever, store)
    }

    fn fake(rows: Vec<RetrievalCandidate>) -> FakeStore {
        FakeStore {
            rows,
            programs: Vec::new(),
            fail: false,
            last_request: Mutex::new(None),
        }
    }

    #[tokio::test]
    async fn test_threshold_applied_and_overfetch_requested() {
        let (retriever, store) = retriever(
            fake(vec![row("deadline 15 July", 0.9), row("deadline 1 June", 0.5), row("noise", 0.1)]),
            2,
        );
        let results = retriever
            .search("When is the deadline?", Some(&[1.0, 0.0][..]), Some(DegreeLevel::Bachelor))
            .await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.hybrid_score >= 0.3));

        let request = store.last_request.lock().clone().unwrap();
        assert_eq!(request.match_count, 10);
        assert_eq!(request.degree_level, Some(DegreeLevel::Bachelor));
        assert!(request.keyword_query.contains("application period"));
        assert_eq!(request.query_embedding, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_no_survivors_is_empty() {
        let (retriever, _) = retriever(fake(vec![row("noise", 0.1)]), 2);
        assert!(retriever.search("Tell me about Informatics", Some(&[1.0, 0.0][..]), None).await.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_zero_results() {
        let mut store = fake(vec![row("x", 0.9)]);
        store.fail = true;
        let (retriever, _) = retriever(store, 2);
        assert!(retriever.search("Tell me about Informatics", Some(&[1.0, 0.0][..]), None).await.is_empty());
        assert!(retriever.program_listing(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_mmr_prefers_diverse_second_pick() {
        let (retriever, _) = retriever(
            fake(vec![
                row("Informatics deadline 15 July", 0.9),
                row("Informatics deadline 15 July (repeat)", 0.85),
                row("Informatics tuition fees 1500 EUR", 0.8),
            ]),
            2,
        );
        let results = retriever.search("Tell me about Informatics", Some(&[0.8, 0.6][..]), None).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "Informatics deadline 15 July");
        assert_eq!(results[1].content, "Informatics tuition fees 1500 EUR");
    }

    #[tokio::test]
    async fn test_listing_shortcut_bypasses_vector_search() {
        let mut store = fake(vec![row("should not be used", 0.9)]);
        store.programs = vec![
            ProgramSummary { degree: "Informatics".into(), degree_level: Some(DegreeLevel::Bachelor), university: None },
            ProgramSummary { degree: "Informatics".into(), degree_level: Some(DegreeLevel::Bachelor), university: Some("Other U".into()) },
            ProgramSummary { degree: "Physics".into(), degree_level: Some(DegreeLevel::Master), university: None },
        ];
        let (retriever, store) = retriever(store, 2);
        let results = retriever.search("List all programs", None, None).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata.chunk_type, PROGRAM_LIST_TYPE);
        assert!(results[0].content.contains("(2 in total)"));
        assert!(results[0].content.contains("- Informatics (bachelor)"));
        assert!(store.last_request.lock().is_none());
    }

    #[tokio::test]
    async fn test_missing_embedding_is_zero_results() {
        let (retriever, store) = retriever(fake(vec![row("deadline 15 July", 0.9)]), 2);
        assert!(retriever.search("When is the deadline?", None, None).await.is_empty());
        assert!(store.last_request.lock().is_none());
    }

    #[test]
    fn test_program_summary_respects_level() {
        let programs = vec![
            ProgramSummary { degree: "Informatics".into(), degree_level: Some(DegreeLevel::Bachelor), university: None },
            ProgramSummary { degree: "Physics".into(), degree_level: Some(DegreeLevel::Master), university: None },
        ];
        let summary = build_program_summary(&programs, Some(DegreeLevel::Master)).unwrap();
        assert!(summary.content.starts_with("Available master programs (1 in total)"));
        assert!(!summary.content.contains("Informatics"));
        assert!(build_program_summary(&[], None).is_none());
    }
}

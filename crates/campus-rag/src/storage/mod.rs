//! Knowledge-base store seam.
//!
//! The production knowledge base lives behind an RPC that computes both the
//! semantic and keyword signals server-side ([`RpcKnowledgeStore`]).
//! [`LocalKnowledgeStore`] answers the same request in-process for offline use.

pub mod local_store;
pub mod rpc_store;

pub use local_store::LocalKnowledgeStore;
pub use rpc_store::RpcKnowledgeStore;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::types::{DegreeLevel, ProgramSummary, RetrievalCandidate};

/// One knowledge-base query. `keyword_query` may differ from the question
/// (query expansion); the embedding is always of the original question.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalRequest {
    pub query_embedding: Vec<f32>,
    #[serde(rename = "query_text")]
    pub keyword_query: String,
    pub match_count: usize,
    pub semantic_weight: f32,
    pub keyword_weight: f32,
    #[serde(rename = "filter_degree_level")]
    pub degree_level: Option<DegreeLevel>,
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Rows ranked by the store's hybrid score, best first.
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<RetrievalCandidate>>;

    /// Every program row in the store; may contain duplicates.
    async fn list_programs(&self) -> Result<Vec<ProgramSummary>>;
}

/// Whether a chunk of `chunk_level` passes a degree filter. Chunks without a
/// level (university-wide information) pass every filter.
pub fn level_matches(filter: Option<DegreeLevel>, chunk_level: Option<DegreeLevel>) -> bool {
    match (filter, chunk_level) {
        (None, _) | (_, None) => true,
        (Some(wanted), Some(level)) => wanted == level,
    }
}

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use super::context::AdvisorContext;
use super::planner::{Action, ActionPlanner, QueryPlan};
use crate::embeddings::EmbeddingModel;
use crate::processing::TextExtractor;
use crate::profile::{ProfileStore, UserDocumentLoader};
use crate::rag::answer::{AnswerKind, AnswerSynthesizer, Evidence};
use crate::rag::retrieval_decision::QueryAnalyzer;
use crate::search::retriever::HybridRetriever;
use crate::search::user_index::UserDocumentIndex;
use crate::types::{Question, RankedUserDocument, UserDocument, UserProfile};

/// What the caller gets back for every question; failures are folded into
/// `kind` and `text`, never returned as errors.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub kind: AnswerKind,
    pub sources: Vec<String>,
    pub plan: QueryPlan,
}

/// Admissions question answering: plan, fetch, rank, compile, synthesise.
///
/// One pass per question with no retries and no plan revision. Requests share
/// nothing mutable, so one agent can serve concurrent questions.
pub struct AdmissionsAgent {
    planner: ActionPlanner,
    retriever: HybridRetriever,
    analyzer: QueryAnalyzer,
    synthesizer: AnswerSynthesizer,
    embeddings: Arc<dyn EmbeddingModel>,
    profile_store: Option<Arc<dyn ProfileStore>>,
    loader: Option<UserDocumentLoader>,
    top_k: usize,
    similarity_threshold: f32,
    embed_timeout: Duration,
    profile_timeout: Duration,
}

impl AdmissionsAgent {
    pub fn new(context: AdvisorContext) -> Self {
        let config = &context.config;
        let analyzer = QueryAnalyzer::new(&config.vocabulary);
        let retriever = HybridRetriever::new(
            context.knowledge_store.clone(),
            context.embeddings.clone(),
            analyzer.clone(),
            context.intent_classifier.clone(),
            config.search.clone(),
            Duration::from_secs(config.knowledge_store.timeout_secs),
        );
        let loader = context.profile_store.clone().map(|store| {
            UserDocumentLoader::new(
                store,
                TextExtractor::new(context.document_converter.clone()),
                config.profile_store.download_concurrency,
            )
        });

        Self {
            planner: ActionPlanner::new(context.llm.clone(), &config.llm, &config.vocabulary),
            retriever,
            analyzer,
            synthesizer: AnswerSynthesizer::new(context.llm.clone(), config),
            embeddings: context.embeddings.clone(),
            profile_store: context.profile_store.clone(),
            loader,
            top_k: config.search.top_k,
            similarity_threshold: config.search.similarity_threshold,
            embed_timeout: Duration::from_secs(config.embedding.timeout_secs),
            profile_timeout: Duration::from_secs(config.profile_store.timeout_secs),
        }
    }

    pub async fn ask(&self, question: &Question) -> Answer {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("ask", request_id = %request_id);
        self.answer(question).instrument(span).await
    }

    async fn answer(&self, question: &Question) -> Answer {
        let text = question.text.trim();
        if text.is_empty() {
            tracing::warn!("Empty question");
            let synthesis = self.synthesizer.insufficient_information();
            return Answer {
                text: synthesis.text,
                kind: synthesis.kind,
                sources: synthesis.sources,
                plan: QueryPlan::new([]),
            };
        }

        let user_id = question
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty() && self.profile_store.is_some());
        tracing::info!(question_len = text.len(), has_user = user_id.is_some(), "Question received");

        // Read once up front: the planner gets the summary line and degree
        // inference uses the applicant type even when no profile is planned.
        let profile = match user_id {
            Some(id) => self.fetch_profile(id).await,
            None => None,
        };
        let summary = profile.as_ref().map(UserProfile::summary_line);
        let plan = self.planner.plan(text, summary.as_deref()).await.plan;

        let wants_kb = plan.contains(Action::SearchKb);
        let wants_doc_search = plan.contains(Action::SearchUserDocs);
        let query_embedding = if wants_kb || (wants_doc_search && user_id.is_some()) {
            self.embed_question(text).await
        } else {
            None
        };
        let degree_level = self.analyzer.infer_degree_level(text, profile.as_ref());

        let kb_search = async {
            if wants_kb {
                self.retriever
                    .search(text, query_embedding.as_deref(), degree_level)
                    .await
            } else {
                Vec::new()
            }
        };
        let docs_fetch = async {
            match user_id {
                Some(id) if plan.needs_user_documents() => self.load_documents(id).await,
                _ => Vec::new(),
            }
        };
        let (knowledge_base, documents) = tokio::join!(kb_search, docs_fetch);

        let user_documents = self
            .select_documents(&plan, query_embedding.as_deref(), documents)
            .await;
        let context_profile = profile.as_ref().filter(|_| plan.contains(Action::FetchProfile));

        tracing::info!(
            plan = %plan,
            degree_level = ?degree_level,
            kb_docs = knowledge_base.len(),
            user_docs = user_documents.len(),
            profile = context_profile.is_some(),
            "Evidence gathered"
        );

        let synthesis = self
            .synthesizer
            .synthesize(
                text,
                &question.history,
                Evidence {
                    profile: context_profile,
                    user_documents: &user_documents,
                    knowledge_base: &knowledge_base,
                },
            )
            .await;

        tracing::info!(kind = ?synthesis.kind, sources = synthesis.sources.len(), "Answer ready");
        Answer {
            text: synthesis.text,
            kind: synthesis.kind,
            sources: synthesis.sources,
            plan,
        }
    }

    async fn fetch_profile(&self, user_id: &str) -> Option<UserProfile> {
        let store = self.profile_store.as_ref()?;
        with_timeout("profile fetch", self.profile_timeout, store.get_profile(user_id))
            .await
            .flatten()
    }

    async fn embed_question(&self, text: &str) -> Option<Vec<f32>> {
        with_timeout("question embedding", self.embed_timeout, self.embeddings.embed_query(text)).await
    }

    async fn load_documents(&self, user_id: &str) -> Vec<UserDocument> {
        let Some(loader) = self.loader.as_ref() else {
            return Vec::new();
        };
        // Listing plus downloads, each bounded by the client timeout.
        match tokio::time::timeout(self.profile_timeout * 2, loader.load(user_id)).await {
            Ok(documents) => documents,
            Err(_) => {
                tracing::warn!("Loading user documents timed out, continuing without them");
                Vec::new()
            }
        }
    }

    /// Ranked and thresholded when the plan searches the documents, passed
    /// through in loader order when it only consults them.
    async fn select_documents(
        &self,
        plan: &QueryPlan,
        query_embedding: Option<&[f32]>,
        documents: Vec<UserDocument>,
    ) -> Vec<RankedUserDocument> {
        if documents.is_empty() {
            return Vec::new();
        }
        if plan.contains(Action::SearchUserDocs) {
            return match query_embedding {
                Some(embedding) => {
                    UserDocumentIndex::new(self.embeddings.as_ref(), self.similarity_threshold)
                        .rank(embedding, documents, self.top_k)
                        .await
                }
                None => Vec::new(),
            };
        }
        documents
            .into_iter()
            .take(self.top_k)
            .map(RankedUserDocument::unranked)
            .collect()
    }
}

/// Await `call` under `timeout`, logging and discarding any failure.
async fn with_timeout<T>(
    what: &str,
    timeout: Duration,
    call: impl Future<Output = anyhow::Result<T>>,
) -> Option<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "{} failed, continuing without it", what);
            None
        }
        Err(_) => {
            tracing::warn!(timeout_secs = timeout.as_secs(), "{} timed out, continuing without it", what);
            None
        }
    }
}

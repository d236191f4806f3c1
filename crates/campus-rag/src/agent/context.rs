//! Explicitly constructed collaborators shared by every request.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::AdvisorConfig;
use crate::embeddings::cache::CachedEmbeddings;
use crate::embeddings::http::HttpEmbeddings;
use crate::embeddings::EmbeddingModel;
use crate::llm::{ExternalProvider, LLMProvider};
use crate::processing::{DocumentConverter, PdfTextConverter};
use crate::profile::{ProfileStore, RestProfileStore};
use crate::rag::retrieval_decision::{IntentClassifier, KeywordIntentClassifier};
use crate::storage::{KnowledgeStore, RpcKnowledgeStore};

/// Configuration plus the external services an [`AdmissionsAgent`] talks to.
/// Built once at startup and treated as read-only afterwards.
///
/// [`AdmissionsAgent`]: super::AdmissionsAgent
#[derive(Clone)]
pub struct AdvisorContext {
    pub config: AdvisorConfig,
    pub llm: Arc<dyn LLMProvider>,
    pub embeddings: Arc<dyn EmbeddingModel>,
    pub knowledge_store: Arc<dyn KnowledgeStore>,
    /// `None` disables all personal data: every question is anonymous.
    pub profile_store: Option<Arc<dyn ProfileStore>>,
    pub document_converter: Arc<dyn DocumentConverter>,
    pub intent_classifier: Arc<dyn IntentClassifier>,
}

impl AdvisorContext {
    pub fn new(
        config: AdvisorConfig,
        llm: Arc<dyn LLMProvider>,
        embeddings: Arc<dyn EmbeddingModel>,
        knowledge_store: Arc<dyn KnowledgeStore>,
    ) -> Self {
        let intent_classifier = Arc::new(KeywordIntentClassifier::new(&config.vocabulary));
        Self {
            config,
            llm,
            embeddings,
            knowledge_store,
            profile_store: None,
            document_converter: Arc::new(PdfTextConverter),
            intent_classifier,
        }
    }

    /// HTTP collaborators for every service named in `config`. Keys are read
    /// from the environment variables the config names.
    pub fn from_config(config: AdvisorConfig) -> Result<Self> {
        let llm = ExternalProvider::from_config(&config.llm).context("Failed to build LLM client")?;
        let embeddings = HttpEmbeddings::from_config(&config.embedding)
            .context("Failed to build embedding client")?;
        let embeddings = CachedEmbeddings::new(embeddings, config.embedding.cache_size);
        let knowledge_store = RpcKnowledgeStore::from_config(&config.knowledge_store)
            .context("Failed to build knowledge store client")?;
        let profile_store = RestProfileStore::from_config(&config.profile_store)
            .context("Failed to build profile store client")?;

        Ok(Self::new(config, Arc::new(llm), Arc::new(embeddings), Arc::new(knowledge_store))
            .with_profile_store(Arc::new(profile_store)))
    }

    pub fn with_profile_store(mut self, store: Arc<dyn ProfileStore>) -> Self {
        self.profile_store = Some(store);
        self
    }

    pub fn with_knowledge_store(mut self, store: Arc<dyn KnowledgeStore>) -> Self {
        self.knowledge_store = store;
        self
    }

    pub fn with_document_converter(mut self, converter: Arc<dyn DocumentConverter>) -> Self {
        self.document_converter = converter;
        self
    }

    pub fn with_intent_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.intent_classifier = classifier;
        self
    }
}

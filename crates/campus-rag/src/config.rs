use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Upper bound on establishing a connection to any collaborator.
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect timeout for a client whose whole request may take `request_timeout`.
pub fn connect_timeout(request_timeout: Duration) -> Duration {
    request_timeout.min(MAX_CONNECT_TIMEOUT)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    pub search: SearchConfig,
    pub context: ContextConfig,
    pub vocabulary: VocabularyConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub knowledge_store: KnowledgeStoreConfig,
    pub profile_store: ProfileStoreConfig,
    pub contact: ContactConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Final number of knowledge-base and user documents kept per question.
    pub top_k: usize,
    /// Over-fetch factor: the store is asked for `top_k * candidate_multiplier` rows.
    pub candidate_multiplier: usize,
    pub similarity_threshold: f32,
    pub semantic_weight: f32,
    pub keyword_weight: f32,
    /// MMR trade-off: 1.0 = pure relevance, 0.0 = pure diversity.
    pub mmr_lambda: f32,
}

impl SearchConfig {
    /// Number of rows requested from the store before threshold and MMR filtering.
    pub fn candidate_count(&self) -> usize {
        self.top_k * self.candidate_multiplier
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            candidate_multiplier: 5,
            similarity_threshold: 0.3,
            semantic_weight: 0.7,
            keyword_weight: 0.3,
            mmr_lambda: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_docs_per_section: usize,
    pub max_chars_per_doc: usize,
    pub history_turns: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_docs_per_section: 5,
            max_chars_per_doc: 1500,
            history_turns: 6,
        }
    }
}

/// Keyword lists behind every heuristic in the pipeline. Kept in config so
/// deployments can tune them without touching the ranking code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VocabularyConfig {
    /// Questions containing a word that starts with any of these always
    /// search the knowledge base ("apply" also covers "applying").
    pub kb_trigger_keywords: Vec<String>,
    /// First-person words that make the planner fallback consult the profile.
    pub personal_keywords: Vec<String>,
    pub deadline_keywords: Vec<String>,
    /// Appended to the keyword query (never the embedding) for timing questions.
    pub deadline_expansion_terms: Vec<String>,
    pub list_intent_keywords: Vec<String>,
    /// A listing question must also name one of these to take the
    /// list-programs shortcut.
    pub program_noun_keywords: Vec<String>,
    /// Presence of these suppresses the list-programs shortcut.
    pub admission_detail_keywords: Vec<String>,
    pub bachelor_keywords: Vec<String>,
    pub master_keywords: Vec<String>,
    /// Knowledge-base lines answered verbatim without the model.
    pub fact_markers: Vec<FactMarker>,
}

/// A line prefix whose line is quoted directly as the answer when the
/// question is about `topic_keywords` (empty = any question).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactMarker {
    pub prefix: String,
    #[serde(default)]
    pub topic_keywords: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for VocabularyConfig {
    fn default() -> Self {
        Self {
            kb_trigger_keywords: strings(&[
                "apply",
                "applie",
                "application",
                "applicant",
                "admission",
                "admissions",
                "deadline",
                "deadlines",
                "requirement",
                "requirements",
                "eligible",
                "eligibility",
                "university",
                "universities",
                "program",
                "programme",
                "programs",
                "degree",
                "bachelor",
                "master",
                "tuition",
                "fee",
                "fees",
                "language",
                "toefl",
                "ielts",
                "intake",
                "semester",
                "enroll",
                "enrollment",
                "course",
            ]),
            personal_keywords: strings(&[
                "my",
                "i",
                "me",
                "mine",
                "profile",
                "documents",
                "document",
                "transcript",
                "transcripts",
                "cv",
                "grades",
            ]),
            deadline_keywords: strings(&[
                "deadline",
                "deadlines",
                "due",
                "when",
                "intake",
                "start date",
                "timeline",
                "apply by",
                "last date",
                "application period",
            ]),
            deadline_expansion_terms: strings(&[
                "deadline",
                "application period",
                "application deadline",
                "intake",
                "winter semester",
                "summer semester",
                "start date",
                "closing date",
            ]),
            list_intent_keywords: strings(&[
                "list",
                "count",
                "show",
                "how many",
                "all programs",
                "which programs",
                "what programs",
                "available programs",
            ]),
            program_noun_keywords: strings(&[
                "program",
                "programs",
                "programme",
                "programmes",
                "degrees",
                "courses",
                "studies",
            ]),
            admission_detail_keywords: strings(&[
                "deadline",
                "requirement",
                "requirements",
                "language",
                "toefl",
                "ielts",
                "tuition",
                "fee",
                "gpa",
                "documents",
                "apply",
            ]),
            bachelor_keywords: strings(&["bachelor", "bachelors", "bachelor's", "undergraduate", "bsc", "b.sc"]),
            master_keywords: strings(&["master", "masters", "master's", "msc", "m.sc", "postgraduate", "graduate"]),
            fact_markers: vec![FactMarker {
                prefix: "Required Language Proficiency:".to_string(),
                topic_keywords: strings(&[
                    "language",
                    "proficiency",
                    "toefl",
                    "ielts",
                    "english",
                    "german",
                    "cefr",
                ]),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible chat completions endpoint.
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub planner_temperature: f32,
    pub answer_temperature: f32,
    pub max_tokens: usize,
    pub planner_max_tokens: usize,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            planner_temperature: 0.0,
            answer_temperature: 0.1,
            max_tokens: 1024,
            planner_max_tokens: 128,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub dimension: usize,
    pub cache_size: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            dimension: 1536,
            cache_size: 1000,
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeStoreConfig {
    /// PostgREST base, e.g. `https://<project>.supabase.co/rest/v1`.
    pub base_url: String,
    pub rpc_function: String,
    /// Table or view enumerated by the list-programs shortcut.
    pub programs_view: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for KnowledgeStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321/rest/v1".to_string(),
            rpc_function: "hybrid_match_chunks".to_string(),
            programs_view: "program_catalog".to_string(),
            api_key_env: "KNOWLEDGE_STORE_KEY".to_string(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileStoreConfig {
    /// Project base URL; REST lives under `/rest/v1`, files under `/storage/v1`.
    pub base_url: String,
    pub bucket: String,
    pub api_key_env: String,
    pub signed_url_ttl_secs: u64,
    pub timeout_secs: u64,
    /// Maximum concurrent document downloads per request.
    pub download_concurrency: usize,
}

impl Default for ProfileStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            bucket: "user-documents".to_string(),
            api_key_env: "PROFILE_STORE_KEY".to_string(),
            signed_url_ttl_secs: 60,
            timeout_secs: 20,
            download_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactConfig {
    /// Human contact channel offered when no evidence is available.
    pub channel: String,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            channel: "the university's student advisory service".to_string(),
        }
    }
}

impl AdvisorConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid =
            |msg: &str| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg.to_string())) };

        if self.search.top_k == 0 {
            return invalid("search.top_k must be > 0");
        }
        if self.search.candidate_multiplier == 0 {
            return invalid("search.candidate_multiplier must be > 0");
        }
        if !(0.0..=1.0).contains(&self.search.similarity_threshold) {
            return invalid("search.similarity_threshold must be in [0.0, 1.0]");
        }
        if !(0.0..=1.0).contains(&self.search.semantic_weight)
            || !(0.0..=1.0).contains(&self.search.keyword_weight)
        {
            return invalid("search weights must be in [0.0, 1.0]");
        }
        if (self.search.semantic_weight + self.search.keyword_weight - 1.0).abs() > 1e-3 {
            return invalid("search.semantic_weight + search.keyword_weight must equal 1.0");
        }
        if !(0.0..=1.0).contains(&self.search.mmr_lambda) {
            return invalid("search.mmr_lambda must be in [0.0, 1.0]");
        }
        if self.context.max_docs_per_section == 0 {
            return invalid("context.max_docs_per_section must be > 0");
        }
        if self.context.max_chars_per_doc == 0 {
            return invalid("context.max_chars_per_doc must be > 0");
        }
        if self.vocabulary.fact_markers.iter().any(|m| m.prefix.trim().is_empty()) {
            return invalid("vocabulary.fact_markers prefixes must not be empty");
        }
        if self.profile_store.download_concurrency == 0 {
            return invalid("profile_store.download_concurrency must be > 0");
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// `<config dir>/campus-rag/config.json`, or `./campus-rag.json` when the
    /// platform has no config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("campus-rag").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("campus-rag.json"))
    }
}

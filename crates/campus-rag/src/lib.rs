pub mod agent;
pub mod config;
pub mod embeddings;
pub mod llm;
pub mod processing;
pub mod profile;
pub mod rag;
pub mod reranking;
pub mod search;
pub mod storage;
pub mod types;

// Re-export primary types for convenience
pub use agent::{AdmissionsAgent, AdvisorContext, Answer};
pub use config::{AdvisorConfig, ConfigError};
pub use rag::AnswerKind;
pub use types::{Chunk, ChunkMetadata, DegreeLevel, Question, RetrievalCandidate, UserProfile};

// Re-export LLM types
pub use llm::{ChatMessage, ChatRole, GenerationConfig, LLMProvider, ProviderInfo};

// Re-export common types
pub use anyhow::{Error, Result};

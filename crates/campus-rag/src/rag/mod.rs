//! Query analysis, context compilation and answer synthesis.

pub mod answer;
pub mod context_compiler;
pub mod retrieval_decision;

pub use answer::{AnswerKind, AnswerSynthesizer, Evidence, Synthesis};
pub use context_compiler::{ContextBundle, ContextCompiler, ContextSection};
pub use retrieval_decision::{IntentClassifier, KeywordIntentClassifier, KeywordSet, QueryAnalyzer};

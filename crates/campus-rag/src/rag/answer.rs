//! Final answer synthesis.
//!
//! Three outcomes besides the model answer: a fact line quoted straight from
//! the knowledge base, the insufficient-information reply when nothing was
//! retrieved, and a textual error when the model call fails.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::config::{AdvisorConfig, FactMarker};
use crate::llm::{ChatMessage, GenerationConfig, LLMProvider};
use crate::rag::context_compiler::{attribution, truncate_chars, ContextCompiler};
use crate::rag::retrieval_decision::KeywordSet;
use crate::types::{RankedUserDocument, RetrievalCandidate, UserProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    /// Quoted from a knowledge-base line, no model involved.
    Extracted,
    Generated,
    InsufficientInformation,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub text: String,
    pub kind: AnswerKind,
    pub sources: Vec<String>,
}

/// Everything retrieved for one question.
#[derive(Debug, Clone, Copy)]
pub struct Evidence<'a> {
    pub profile: Option<&'a UserProfile>,
    pub user_documents: &'a [RankedUserDocument],
    pub knowledge_base: &'a [RetrievalCandidate],
}

const ANSWER_SYSTEM_PROMPT: &str = "You are an admissions advisor for university degree programs.\n\
Answer ONLY with facts stated in the context below. If the context does not contain the answer, \
say that you do not have that information and suggest contacting {contact}.\n\
Never invent deadlines, fees, grades or requirements. Quote numbers and dates exactly as written.\n\
When the applicant's profile or documents are given, relate the answer to them.\n\
Today's date is {date}.";

struct CompiledMarker {
    prefix: String,
    topic: Option<KeywordSet>,
}

pub struct AnswerSynthesizer {
    llm: Arc<dyn LLMProvider>,
    generation: GenerationConfig,
    timeout: Duration,
    compiler: ContextCompiler,
    markers: Vec<CompiledMarker>,
    contact: String,
    history_turns: usize,
    history_chars: usize,
}

impl AnswerSynthesizer {
    pub fn new(llm: Arc<dyn LLMProvider>, config: &AdvisorConfig) -> Self {
        Self {
            llm,
            generation: GenerationConfig::new(config.llm.max_tokens, config.llm.answer_temperature),
            timeout: Duration::from_secs(config.llm.timeout_secs),
            compiler: ContextCompiler::new(&config.context),
            markers: config.vocabulary.fact_markers.iter().map(compile_marker).collect(),
            contact: config.contact.channel.clone(),
            history_turns: config.context.history_turns,
            history_chars: config.context.max_chars_per_doc,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The reply given when no evidence was retrieved.
    pub fn insufficient_information(&self) -> Synthesis {
        Synthesis {
            text: format!(
                "I'm sorry, I don't have enough information to answer that question. \
                 Please contact {} for help.",
                self.contact
            ),
            kind: AnswerKind::InsufficientInformation,
            sources: Vec::new(),
        }
    }

    pub async fn synthesize(&self, question: &str, history: &[ChatMessage], evidence: Evidence<'_>) -> Synthesis {
        if evidence.knowledge_base.is_empty() && evidence.user_documents.is_empty() {
            tracing::info!("No documents retrieved, returning insufficient-information answer");
            return self.insufficient_information();
        }

        if let Some(extracted) = self.extract_fact(question, evidence.knowledge_base) {
            tracing::info!(source = ?extracted.sources.first(), "Answered from fact line without model");
            return extracted;
        }

        let context = self
            .compiler
            .compile(evidence.profile, evidence.user_documents, evidence.knowledge_base);
        let messages = self.answer_messages(question, history, &context.render());

        let started = std::time::Instant::now();
        match tokio::time::timeout(self.timeout, self.llm.chat(&messages, &self.generation)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    answer_len = text.len(),
                    "Answer generated"
                );
                Synthesis {
                    text: text.trim().to_string(),
                    kind: AnswerKind::Generated,
                    sources: sources(evidence.user_documents, evidence.knowledge_base),
                }
            }
            Ok(Ok(_)) => {
                tracing::error!("Answer model returned an empty reply");
                self.error_answer()
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Answer model call failed");
                self.error_answer()
            }
            Err(_) => {
                tracing::error!(timeout_secs = self.timeout.as_secs(), "Answer model call timed out");
                self.error_answer()
            }
        }
    }

    /// First knowledge-base line starting with a marker whose topic the
    /// question is about, quoted with its source.
    pub fn extract_fact(&self, question: &str, knowledge_base: &[RetrievalCandidate]) -> Option<Synthesis> {
        let active: Vec<&CompiledMarker> = self
            .markers
            .iter()
            .filter(|m| m.topic.as_ref().map_or(true, |topic| topic.matches(question)))
            .collect();
        if active.is_empty() {
            return None;
        }

        for candidate in knowledge_base {
            for line in candidate.content.lines().map(str::trim) {
                let Some((head, value)) = active.iter().find_map(|m| split_marker(line, &m.prefix)) else {
                    continue;
                };
                if value.is_empty() {
                    continue;
                }
                let source = attribution(candidate);
                return Some(Synthesis {
                    text: format!("{} {}\n\nSource: {}", head, value, source),
                    kind: AnswerKind::Extracted,
                    sources: vec![source],
                });
            }
        }
        None
    }

    fn answer_messages(&self, question: &str, history: &[ChatMessage], context: &str) -> Vec<ChatMessage> {
        let system = ANSWER_SYSTEM_PROMPT
            .replace("{contact}", &self.contact)
            .replace("{date}", &Local::now().format("%Y-%m-%d").to_string());

        let mut messages = vec![ChatMessage::system(system)];
        let skip = history.len().saturating_sub(self.history_turns);
        messages.extend(history.iter().skip(skip).map(|turn| ChatMessage {
            role: turn.role,
            content: truncate_chars(&turn.content, self.history_chars),
        }));
        messages.push(ChatMessage::user(format!(
            "Context:\n{}\n\nQuestion: {}",
            context,
            question.trim()
        )));
        messages
    }

    fn error_answer(&self) -> Synthesis {
        Synthesis {
            text: format!(
                "I'm sorry, something went wrong while preparing your answer. \
                 Please try again in a moment or contact {}.",
                self.contact
            ),
            kind: AnswerKind::Error,
            sources: Vec::new(),
        }
    }
}

fn compile_marker(marker: &FactMarker) -> CompiledMarker {
    CompiledMarker {
        prefix: marker.prefix.trim().to_lowercase(),
        topic: if marker.topic_keywords.is_empty() {
            None
        } else {
            Some(KeywordSet::new(&marker.topic_keywords))
        },
    }
}

/// `(marker as written, trimmed rest)` when `line` starts with the lowercase
/// `prefix`, ignoring case. Compared char by char because lowercasing can
/// change byte lengths ("İ" becomes "i̇").
fn split_marker<'l>(line: &'l str, prefix: &str) -> Option<(&'l str, &'l str)> {
    let mut expected = prefix.chars().peekable();
    let mut end = 0;
    for (idx, c) in line.char_indices() {
        if expected.peek().is_none() {
            break;
        }
        for lower in c.to_lowercase() {
            if expected.next() != Some(lower) {
                return None;
            }
        }
        end = idx + c.len_utf8();
    }
    if expected.peek().is_some() {
        return None;
    }
    Some((line[..end].trim(), line[end..].trim()))
}

/// Knowledge-base attributions then user file names, without duplicates.
fn sources(user_documents: &[RankedUserDocument], knowledge_base: &[RetrievalCandidate]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let labels = knowledge_base
        .iter()
        .map(attribution)
        .chain(user_documents.iter().map(|d| format!("Your document: {}", d.document.filename)));
    for label in labels {
        if !label.is_empty() && !out.contains(&label) {
            out.push(label);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatRole, ProviderInfo};
    use crate::types::{ChunkMetadata, UserDocument};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingLlm {
        reply: Option<String>,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl LLMProvider for RecordingLlm {
        async fn chat(&self, messages: &[ChatMessage], _config: &GenerationConfig) -> Result<String> {
            self.calls.lock().push(messages.to_vec());
            self.reply.clone().ok_or_else(|| anyhow!("quota exceeded"))
        }

        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "recording".to_string(),
                model: "none".to_string(),
                is_local: true,
            }
        }
    }

    fn synthesizer(reply: Option<&str>) -> (AnswerSynthesizer, Arc<RecordingLlm>) {
        let llm = Arc::new(RecordingLlm {
            reply: reply.map(str::to_string),
            ..Default::default()
        });
        let mut config = AdvisorConfig::default();
        config.contact.channel = "admissions@tu.example".to_string();
        config.context.history_turns = 2;
        (AnswerSynthesizer::new(llm.clone(), &config), llm)
    }

    fn kb(content: &str) -> RetrievalCandidate {
        RetrievalCandidate {
            content: content.to_string(),
            metadata: ChunkMetadata {
                source: "https://tu.example/informatics".to_string(),
                university: "TU Example".to_string(),
                degree: "Informatics".to_string(),
                ..Default::default()
            },
            similarity_score: 0.9,
            keyword_rank: 0.5,
            hybrid_score: 0.78,
            embedding: None,
        }
    }

    fn evidence<'a>(kb: &'a [RetrievalCandidate], docs: &'a [RankedUserDocument]) -> Evidence<'a> {
        Evidence {
            profile: None,
            user_documents: docs,
            knowledge_base: kb,
        }
    }

    #[tokio::test]
    async fn test_no_evidence_never_calls_model() {
        let (synth, llm) = synthesizer(Some("made up"));
        let answer = synth.synthesize("What is the deadline?", &[], evidence(&[], &[])).await;
        assert_eq!(answer.kind, AnswerKind::InsufficientInformation);
        assert!(answer.text.contains("admissions@tu.example"));
        assert_eq!(answer, synth.insufficient_information());
        assert!(llm.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_fact_line_answers_without_model() {
        let (synth, llm) = synthesizer(None);
        let chunks = vec![kb("Informatics (bachelor)\nRequired Language Proficiency: TOEFL 88\nKeywords: language")];
        let answer = synth
            .synthesize("Which language test score do I need?", &[], evidence(&chunks, &[]))
            .await;
        assert_eq!(answer.kind, AnswerKind::Extracted);
        assert!(answer.text.contains("TOEFL 88"));
        assert!(answer.text.contains("TU Example: Informatics (https://tu.example/informatics)"));
        assert_eq!(answer.sources.len(), 1);
        assert!(llm.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_fact_line_ignored_for_other_topics() {
        let (synth, llm) = synthesizer(Some("The deadline is 15 July."));
        let chunks = vec![kb("Required Language Proficiency: TOEFL 88\nDeadline: 15 July")];
        let answer = synth.synthesize("When is the deadline?", &[], evidence(&chunks, &[])).await;
        assert_eq!(answer.kind, AnswerKind::Generated);
        assert_eq!(llm.calls.lock().len(), 1);
    }

    #[test]
    fn test_marker_match_survives_lowercase_length_change() {
        let prefix = "İngilizce Yeterlilik:".to_lowercase();
        assert_eq!(
            split_marker("İNGILIZCE YETERLILIK: TOEFL 80", &prefix),
            Some(("İNGILIZCE YETERLILIK:", "TOEFL 80"))
        );
        assert_eq!(
            split_marker("required language proficiency:  IELTS 6.5 ", "required language proficiency:"),
            Some(("required language proficiency:", "IELTS 6.5"))
        );
        assert_eq!(split_marker("Required", "required language proficiency:"), None);
        assert_eq!(split_marker("Deadline: 15 July", "required language proficiency:"), None);
    }

    #[tokio::test]
    async fn test_non_ascii_fact_marker_answers_without_model() {
        let llm = Arc::new(RecordingLlm::default());
        let mut config = AdvisorConfig::default();
        config.vocabulary.fact_markers = vec![FactMarker {
            prefix: "İngilizce Yeterlilik:".to_string(),
            topic_keywords: Vec::new(),
        }];
        let synth = AnswerSynthesizer::new(llm.clone(), &config);
        let chunks = vec![kb("İNGILIZCE YETERLILIK: TOEFL 80")];
        let answer = synth.synthesize("İngilizce şartı nedir?", &[], evidence(&chunks, &[])).await;
        assert_eq!(answer.kind, AnswerKind::Extracted);
        assert!(answer.text.starts_with("İNGILIZCE YETERLILIK: TOEFL 80"));
        assert!(llm.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_generated_answer_uses_context_and_recent_history() {
        let (synth, llm) = synthesizer(Some("  The deadline is 15 July.  "));
        let chunks = vec![kb("Application deadline: 15 July")];
        let docs = vec![RankedUserDocument {
            document: UserDocument {
                doc_type: "transcript".to_string(),
                filename: "transcript.pdf".to_string(),
                text: "GPA 1.7".to_string(),
            },
            similarity: 0.6,
        }];
        let history = vec![
            ChatMessage::user("old question"),
            ChatMessage::assistant("old answer"),
            ChatMessage::user("Is Informatics taught in English?"),
            ChatMessage::assistant("Yes."),
        ];

        let answer = synth
            .synthesize("And when is the deadline?", &history, evidence(&chunks, &docs))
            .await;
        assert_eq!(answer.kind, AnswerKind::Generated);
        assert_eq!(answer.text, "The deadline is 15 July.");
        assert_eq!(
            answer.sources,
            vec![
                "TU Example: Informatics (https://tu.example/informatics)".to_string(),
                "Your document: transcript.pdf".to_string()
            ]
        );

        let calls = llm.calls.lock();
        let messages = &calls[0];
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, ChatRole::System);
        assert!(messages[0].content.contains("admissions@tu.example"));
        assert_eq!(messages[1].content, "Is Informatics taught in English?");
        let prompt = &messages[3].content;
        assert!(prompt.contains("Application deadline: 15 July"));
        assert!(prompt.contains("GPA 1.7"));
        assert!(prompt.ends_with("Question: And when is the deadline?"));
    }

    #[tokio::test]
    async fn test_model_failure_is_textual() {
        let (synth, _) = synthesizer(None);
        let chunks = vec![kb("Application deadline: 15 July")];
        let answer = synth.synthesize("When is the deadline?", &[], evidence(&chunks, &[])).await;
        assert_eq!(answer.kind, AnswerKind::Error);
        assert!(answer.text.contains("admissions@tu.example"));
        assert!(answer.sources.is_empty());
    }
}

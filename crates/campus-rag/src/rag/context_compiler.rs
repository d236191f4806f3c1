//! Bounded context assembly for answer generation.

use crate::config::ContextConfig;
use crate::types::{RankedUserDocument, RetrievalCandidate, UserProfile};

pub const PROFILE_SECTION: &str = "Applicant profile";
pub const USER_DOCUMENTS_SECTION: &str = "Applicant documents";
pub const KNOWLEDGE_BASE_SECTION: &str = "Program information";

#[derive(Debug, Clone, PartialEq)]
pub struct ContextSection {
    pub title: &'static str,
    pub entries: Vec<String>,
}

/// Up to three labelled sections; empty sections are never stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextBundle {
    sections: Vec<ContextSection>,
}

impl ContextBundle {
    pub fn sections(&self) -> &[ContextSection] {
        &self.sections
    }

    pub fn section(&self, title: &str) -> Option<&ContextSection> {
        self.sections.iter().find(|s| s.title == title)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn render(&self) -> String {
        self.sections
            .iter()
            .map(|section| format!("## {}\n\n{}", section.title, section.entries.join("\n\n")))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn push(&mut self, title: &'static str, entries: Vec<String>) {
        if !entries.is_empty() {
            self.sections.push(ContextSection { title, entries });
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextCompiler {
    max_docs: usize,
    max_chars: usize,
}

impl ContextCompiler {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            max_docs: config.max_docs_per_section,
            max_chars: config.max_chars_per_doc,
        }
    }

    pub fn compile(
        &self,
        profile: Option<&UserProfile>,
        user_documents: &[RankedUserDocument],
        knowledge_base: &[RetrievalCandidate],
    ) -> ContextBundle {
        let mut bundle = ContextBundle::default();

        let profile_entries: Vec<String> = profile
            .map(UserProfile::to_context_text)
            .filter(|text| !text.is_empty())
            .map(|text| truncate_chars(&text, self.max_chars))
            .into_iter()
            .collect();
        bundle.push(PROFILE_SECTION, profile_entries);

        let document_entries = user_documents
            .iter()
            .filter(|d| !d.document.text.trim().is_empty())
            .take(self.max_docs)
            .map(|d| {
                format!(
                    "[{}] {}\n{}",
                    d.document.doc_type,
                    d.document.filename,
                    truncate_chars(d.document.text.trim(), self.max_chars)
                )
            })
            .collect();
        bundle.push(USER_DOCUMENTS_SECTION, document_entries);

        let kb_entries = knowledge_base
            .iter()
            .filter(|c| !c.content.trim().is_empty())
            .take(self.max_docs)
            .enumerate()
            .map(|(i, c)| {
                format!(
                    "[{}] {}\n{}",
                    i + 1,
                    attribution(c),
                    truncate_chars(c.content.trim(), self.max_chars)
                )
            })
            .collect();
        bundle.push(KNOWLEDGE_BASE_SECTION, kb_entries);

        tracing::debug!(
            sections = bundle.sections.len(),
            chars = bundle.render().len(),
            "Compiled answer context"
        );
        bundle
    }
}

/// `University: Degree (source)` style label for a knowledge-base chunk.
pub fn attribution(candidate: &RetrievalCandidate) -> String {
    let label = candidate.metadata.label();
    let source = candidate.metadata.source.trim();
    if source.is_empty() || source == label {
        label
    } else if label.is_empty() {
        source.to_string()
    } else {
        format!("{} ({})", label, source)
    }
}

/// At most `max_chars` characters, with a trailing ellipsis when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", text[..byte_idx].trim_end()),
        None => text.to_string(),
    }
}

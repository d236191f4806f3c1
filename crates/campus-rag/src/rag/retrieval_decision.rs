//! Retrieval decisions made from the raw question text
//!
//! Degree-level inference, keyword query expansion and the list-programs
//! intent boundary. All vocabularies come from [`VocabularyConfig`].

use regex::Regex;

use crate::config::VocabularyConfig;
use crate::types::{DegreeLevel, UserProfile};

/// Case-insensitive keyword matcher with word boundaries on both sides, so
/// "my" does not fire on "mystery" while "b.sc" and "how many" still match.
#[derive(Debug, Clone)]
pub struct KeywordSet {
    pattern: Option<Regex>,
}

impl KeywordSet {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Self {
        Self::compile(keywords, r"(?:$|[^\p{L}\p{N}])")
    }

    /// Boundary before the keyword only, so a stem also matches its
    /// inflections ("programme" fires on "programmes").
    pub fn prefixes<S: AsRef<str>>(keywords: &[S]) -> Self {
        Self::compile(keywords, "")
    }

    fn compile<S: AsRef<str>>(keywords: &[S], trailing: &str) -> Self {
        let alternatives: Vec<String> = keywords
            .iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .map(|k| regex::escape(&k))
            .collect();
        if alternatives.is_empty() {
            return Self { pattern: None };
        }

        let source = format!(
            r"(?i)(?:^|[^\p{{L}}\p{{N}}])(?:{}){}",
            alternatives.join("|"),
            trailing
        );
        match Regex::new(&source) {
            Ok(re) => Self { pattern: Some(re) },
            Err(e) => {
                tracing::warn!(error = %e, "Keyword list did not compile, it will never match");
                Self { pattern: None }
            }
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.as_ref().is_some_and(|re| re.is_match(text))
    }
}

/// Boundary for the "list/count/show programs" shortcut. Keyword matching is
/// a heuristic, so the classifier sits behind a trait and can be replaced.
pub trait IntentClassifier: Send + Sync {
    fn is_program_listing(&self, question: &str) -> bool;
}

/// Listing vocabulary and a program noun present, and no admission-detail
/// vocabulary present.
pub struct KeywordIntentClassifier {
    listing: KeywordSet,
    programs: KeywordSet,
    details: KeywordSet,
}

impl KeywordIntentClassifier {
    pub fn new(vocabulary: &VocabularyConfig) -> Self {
        Self {
            listing: KeywordSet::new(&vocabulary.list_intent_keywords),
            programs: KeywordSet::new(&vocabulary.program_noun_keywords),
            details: KeywordSet::new(&vocabulary.admission_detail_keywords),
        }
    }
}

impl IntentClassifier for KeywordIntentClassifier {
    fn is_program_listing(&self, question: &str) -> bool {
        self.listing.matches(question) && self.programs.matches(question) && !self.details.matches(question)
    }
}

/// Compiled vocabularies used while deciding what and how to search.
#[derive(Debug, Clone)]
pub struct QueryAnalyzer {
    bachelor: KeywordSet,
    master: KeywordSet,
    deadline: KeywordSet,
    expansion_terms: Vec<String>,
}

impl QueryAnalyzer {
    pub fn new(vocabulary: &VocabularyConfig) -> Self {
        Self {
            bachelor: KeywordSet::new(&vocabulary.bachelor_keywords),
            master: KeywordSet::new(&vocabulary.master_keywords),
            deadline: KeywordSet::new(&vocabulary.deadline_keywords),
            expansion_terms: vocabulary.deadline_expansion_terms.clone(),
        }
    }

    /// Degree level named in the question itself. Bachelor wins if both appear.
    pub fn explicit_degree_level(&self, question: &str) -> Option<DegreeLevel> {
        if self.bachelor.matches(question) {
            Some(DegreeLevel::Bachelor)
        } else if self.master.matches(question) {
            Some(DegreeLevel::Master)
        } else {
            None
        }
    }

    /// Explicit question keywords first, then the applicant type from the
    /// profile. `None` means no filter.
    pub fn infer_degree_level(
        &self,
        question: &str,
        profile: Option<&UserProfile>,
    ) -> Option<DegreeLevel> {
        self.explicit_degree_level(question).or_else(|| {
            profile
                .and_then(UserProfile::applicant_type)
                .and_then(|a| a.implied_degree_level())
        })
    }

    pub fn is_timing_question(&self, question: &str) -> bool {
        self.deadline.matches(question)
    }

    /// Keyword-search text. Timing questions get the expansion terms appended
    /// (skipping ones already present); everything else is passed through.
    pub fn expand_keyword_query(&self, question: &str) -> String {
        if !self.is_timing_question(question) {
            return question.to_string();
        }
        let lowered = question.to_lowercase();
        let extra: Vec<&str> = self
            .expansion_terms
            .iter()
            .map(String::as_str)
            .filter(|term| !lowered.contains(&term.to_lowercase()))
            .collect();
        if extra.is_empty() {
            question.to_string()
        } else {
            format!("{} {}", question, extra.join(" "))
        }
    }
}

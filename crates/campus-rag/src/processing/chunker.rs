//! Knowledge-base chunk normalisation.
//!
//! Program metadata becomes one overview chunk plus one chunk per fact;
//! program pages in markdown become one chunk per heading section. Every
//! chunk repeats its university, degree and level so it stands on its own
//! in a prompt, and fact chunks carry a `Keywords:` line to help full-text
//! ranking on paraphrased questions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{Chunk, ChunkMetadata, DegreeLevel};

pub const OVERVIEW_TYPE: &str = "overview";
pub const FACT_TYPE: &str = "fact";
pub const SECTION_TYPE: &str = "section";

/// Size-bounded text splitting that prefers natural break points.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    min_chunk_size: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize, min_chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size / 2),
            min_chunk_size,
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.len() <= self.chunk_size {
            if text.is_empty() || text.len() < self.min_chunk_size {
                return Vec::new();
            }
            return vec![text.to_string()];
        }

        let mut pieces = Vec::new();
        let mut start = 0;

        while start < text.len() {
            let end = snap_to_char_boundary(text, start + self.chunk_size);
            let mut actual_end = if end < text.len() {
                self.find_break_point(text, start, end)
            } else {
                end
            };
            if actual_end <= start {
                actual_end = next_char_boundary(text, start);
            }

            let piece = text[start..actual_end].trim();
            if piece.len() >= self.min_chunk_size {
                pieces.push(piece.to_string());
            }
            if actual_end >= text.len() {
                break;
            }

            // Move forward with overlap
            let len = actual_end - start;
            let step = if len > self.chunk_overlap { len - self.chunk_overlap } else { len };
            let next = snap_to_char_boundary(text, start + step);
            start = if next > start { next } else { actual_end };
        }

        pieces
    }

    fn find_break_point(&self, text: &str, start: usize, preferred_end: usize) -> usize {
        let search_start = snap_to_char_boundary(text, preferred_end.saturating_sub(200).max(start));
        let safe_end = snap_to_char_boundary(text, preferred_end);
        if search_start >= safe_end {
            return safe_end;
        }

        let region = &text[search_start..safe_end];

        // Priority: paragraph break > sentence end > line break > word break
        if let Some(pos) = region.rfind("\n\n") {
            return search_start + pos + 2;
        }
        if let Some(pos) = region.rfind(". ").or_else(|| region.rfind(".\n")) {
            return search_start + pos + 2;
        }
        if let Some(pos) = region.rfind('\n') {
            return search_start + pos + 1;
        }
        if let Some(pos) = region.rfind(' ') {
            return search_start + pos + 1;
        }

        safe_end
    }
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self::new(1200, 150, 40)
    }
}

/// Round a byte offset down to a UTF-8 char boundary, capped at `text.len()`.
fn snap_to_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut p = pos;
    while p > 0 && !text.is_char_boundary(p) {
        p -= 1;
    }
    p
}

fn next_char_boundary(text: &str, pos: usize) -> usize {
    text[pos..]
        .chars()
        .next()
        .map_or(text.len(), |c| pos + c.len_utf8())
}

/// Crawled metadata for one degree program.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramRecord {
    pub university: String,
    pub degree: String,
    /// Raw label such as "B.Sc." or "Master of Science".
    pub degree_level: Option<String>,
    /// Page the record was crawled from.
    pub source: String,
    /// Fact key (`application_deadline`, `required_language_proficiency`, ...) to value.
    pub facts: BTreeMap<String, serde_json::Value>,
    /// Program page body, if crawled.
    pub markdown: Option<String>,
}

impl ProgramRecord {
    pub fn level(&self) -> Option<DegreeLevel> {
        self.degree_level
            .as_deref()
            .and_then(DegreeLevel::parse)
            .or_else(|| DegreeLevel::parse(&self.degree))
    }

    /// `University: Degree (level)`
    pub fn title(&self) -> String {
        let base = match (self.university.trim(), self.degree.trim()) {
            ("", degree) => degree.to_string(),
            (university, "") => university.to_string(),
            (university, degree) => format!("{}: {}", university, degree),
        };
        match self.level() {
            Some(level) => format!("{} ({})", base, level),
            None => base,
        }
    }

    fn metadata(&self, chunk_type: &str) -> ChunkMetadata {
        ChunkMetadata {
            source: self.source.clone(),
            university: self.university.trim().to_string(),
            degree: self.degree.trim().to_string(),
            degree_level: self.level(),
            section: None,
            key: None,
            chunk_type: chunk_type.to_string(),
        }
    }
}

/// Hint terms appended to fact chunks, matched on substrings of the fact key.
const KEYWORD_HINTS: &[(&str, &[&str])] = &[
    ("deadline", &["deadline", "application period", "closing date", "apply by", "intake"]),
    ("start", &["start date", "intake", "winter semester", "summer semester"]),
    ("language", &["language requirement", "TOEFL", "IELTS", "English", "German", "proficiency"]),
    ("tuition", &["tuition", "fees", "costs", "semester contribution"]),
    ("fee", &["tuition", "fees", "costs"]),
    ("duration", &["duration", "semesters", "years", "length of study"]),
    ("requirement", &["admission requirements", "eligibility", "prerequisites"]),
    ("admission", &["admission", "eligibility", "how to apply"]),
    ("gpa", &["grade", "GPA", "minimum grade"]),
    ("credits", &["ECTS", "credits"]),
];

#[derive(Debug, Clone, Default)]
pub struct ProgramChunker {
    splitter: TextSplitter,
}

impl ProgramChunker {
    pub fn new(splitter: TextSplitter) -> Self {
        Self { splitter }
    }

    /// Metadata chunks followed by markdown section chunks, when present.
    pub fn chunk_record(&self, record: &ProgramRecord) -> Vec<Chunk> {
        let mut chunks = self.from_program(record);
        if let Some(markdown) = record.markdown.as_deref() {
            chunks.extend(self.from_markdown(record, markdown));
        }
        chunks
    }

    /// One overview chunk plus one chunk per non-empty fact.
    pub fn from_program(&self, record: &ProgramRecord) -> Vec<Chunk> {
        let title = record.title();
        let facts: Vec<(&str, String)> = record
            .facts
            .iter()
            .filter_map(|(key, value)| render_fact(value).map(|v| (key.as_str(), v)))
            .collect();

        let mut overview = format!("{}\n", title);
        if !record.source.is_empty() {
            overview.push_str(&format!("Source: {}\n", record.source));
        }
        for (key, value) in &facts {
            overview.push_str(&format!("{}: {}\n", key_label(key), value));
        }
        overview.push_str(&format!("Keywords: {}", overview_keywords(record).join(", ")));

        let mut chunks = vec![Chunk {
            content: overview,
            metadata: record.metadata(OVERVIEW_TYPE),
        }];

        for (key, value) in facts {
            let mut hints = fact_keywords(key);
            hints.push(record.degree.trim().to_string());
            if let Some(level) = record.level() {
                hints.push(level.to_string());
            }
            hints.retain(|h| !h.is_empty());

            let content = format!(
                "{}\n{}: {}\nKeywords: {}",
                title,
                key_label(key),
                value,
                hints.join(", ")
            );
            let mut metadata = record.metadata(FACT_TYPE);
            metadata.key = Some(key.to_string());
            chunks.push(Chunk { content, metadata });
        }

        chunks
    }

    /// One or more chunks per `#` section. Text before the first heading is
    /// filed under "Overview".
    pub fn from_markdown(&self, record: &ProgramRecord, markdown: &str) -> Vec<Chunk> {
        let title = record.title();
        let mut chunks = Vec::new();

        for (heading, body) in split_sections(markdown) {
            for piece in self.splitter.split(&body) {
                let mut metadata = record.metadata(SECTION_TYPE);
                metadata.section = Some(heading.clone());
                chunks.push(Chunk {
                    content: format!("{} - {}\n{}", title, heading, piece),
                    metadata,
                });
            }
        }

        chunks
    }
}

/// `(heading, body)` pairs in document order; empty bodies are dropped.
fn split_sections(markdown: &str) -> Vec<(String, String)> {
    let mut sections = Vec::new();
    let mut heading = "Overview".to_string();
    let mut body = String::new();

    for line in markdown.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            if !body.trim().is_empty() {
                sections.push((heading.clone(), body.trim().to_string()));
            }
            body.clear();
            let text = trimmed.trim_start_matches('#').trim();
            if !text.is_empty() {
                heading = text.to_string();
            }
        } else {
            body.push_str(line);
            body.push('\n');
        }
    }
    if !body.trim().is_empty() {
        sections.push((heading, body.trim().to_string()));
    }
    sections
}

/// `required_language_proficiency` -> `Required Language Proficiency`
pub fn key_label(key: &str) -> String {
    key.split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn fact_keywords(key: &str) -> Vec<String> {
    let lowered = key.to_lowercase();
    let mut hints: Vec<String> = Vec::new();
    for (needle, terms) in KEYWORD_HINTS {
        if lowered.contains(needle) {
            for term in terms.iter() {
                if !hints.iter().any(|h| h.eq_ignore_ascii_case(term)) {
                    hints.push(term.to_string());
                }
            }
        }
    }
    if hints.is_empty() {
        hints.push(key_label(key).to_lowercase());
    }
    hints
}

fn overview_keywords(record: &ProgramRecord) -> Vec<String> {
    let mut keywords = vec!["program overview".to_string(), "degree program".to_string()];
    for value in [record.university.trim(), record.degree.trim()] {
        if !value.is_empty() {
            keywords.push(value.to_string());
        }
    }
    if let Some(level) = record.level() {
        keywords.push(level.to_string());
    }
    keywords
}

/// Human-readable fact value; `None` for null or empty values.
fn render_fact(value: &serde_json::Value) -> Option<String> {
    let rendered = match value {
        serde_json::Value::Null => return None,
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(render_fact)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    };
    if rendered.is_empty() {
        None
    } else {
        Some(rendered)
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::llm::ChatMessage;

/// Program tier used to narrow knowledge-base retrieval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum DegreeLevel {
    Bachelor,
    Master,
}

impl DegreeLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bachelor => "bachelor",
            Self::Master => "master",
        }
    }

    /// Normalise free-form degree labels as they appear in crawled program
    /// metadata ("B.Sc.", "Bachelor of Arts", "MSc", "Master").
    pub fn parse(label: &str) -> Option<Self> {
        let normalized: String = label
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect();
        let normalized = normalized.trim();
        if normalized.is_empty() {
            return None;
        }

        let first = normalized.split_whitespace().next().unwrap_or("");
        match first {
            "bachelor" | "bachelors" | "undergraduate" | "bsc" | "ba" | "beng" | "bba" | "llb" => {
                Some(Self::Bachelor)
            }
            "master" | "masters" | "graduate" | "postgraduate" | "msc" | "ma" | "meng"
            | "mba" | "llm" => Some(Self::Master),
            _ => None,
        }
    }
}

impl fmt::Display for DegreeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stores label levels inconsistently ("Bachelor", "B.Sc.", null), so parse
/// leniently instead of failing the whole row.
fn lenient_degree_level<'de, D>(deserializer: D) -> Result<Option<DegreeLevel>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(DegreeLevel::parse))
}

/// Provenance attached to every knowledge-base chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkMetadata {
    pub source: String,
    pub university: String,
    pub degree: String,
    #[serde(deserialize_with = "lenient_degree_level")]
    pub degree_level: Option<DegreeLevel>,
    pub section: Option<String>,
    pub key: Option<String>,
    #[serde(rename = "type")]
    pub chunk_type: String,
}

impl ChunkMetadata {
    /// Short human label used in context headers and source attributions.
    pub fn label(&self) -> String {
        match (self.university.is_empty(), self.degree.is_empty()) {
            (false, false) => format!("{}: {}", self.university, self.degree),
            (false, true) => self.university.clone(),
            (true, false) => self.degree.clone(),
            (true, true) => self.source.clone(),
        }
    }
}

/// Self-contained unit of knowledge-base text. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// One row returned by the knowledge store for a single query.
///
/// `hybrid_score` is computed by the store and trusted as-is. The optional
/// `embedding` lets stores that already hold vectors skip re-embedding before
/// diversity selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub content: String,
    #[serde(default)]
    pub metadata: ChunkMetadata,
    #[serde(default)]
    pub similarity_score: f32,
    #[serde(default)]
    pub keyword_rank: f32,
    #[serde(default)]
    pub hybrid_score: f32,
    #[serde(default, skip_serializing)]
    pub embedding: Option<Vec<f32>>,
}

/// Distinct (degree, degree_level) pair used by the list-programs shortcut.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramSummary {
    pub degree: String,
    #[serde(default, deserialize_with = "lenient_degree_level")]
    pub degree_level: Option<DegreeLevel>,
    #[serde(default)]
    pub university: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ApplicantType {
    #[serde(rename = "high-school", alias = "high_school", alias = "highschool")]
    HighSchool,
    #[serde(rename = "university")]
    University,
    #[serde(other)]
    Other,
}

impl ApplicantType {
    /// Degree tier an applicant of this type would normally apply to.
    pub fn implied_degree_level(&self) -> Option<DegreeLevel> {
        match self {
            Self::HighSchool => Some(DegreeLevel::Bachelor),
            Self::University => Some(DegreeLevel::Master),
            Self::Other => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighSchool => "high-school",
            Self::University => "university",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserInfo {
    pub name: Option<String>,
    pub city: Option<String>,
    pub applicant_type: Option<ApplicantType>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Education {
    #[serde(rename = "type")]
    pub kind: Option<ApplicantType>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// Snapshot of the applicant read at request time. Never mutated here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub user: UserInfo,
    pub education: Education,
    pub preferences: BTreeMap<String, serde_json::Value>,
}

impl UserProfile {
    /// Applicant type from the user record, falling back to the education type.
    pub fn applicant_type(&self) -> Option<ApplicantType> {
        self.user.applicant_type.or(self.education.kind)
    }

    /// One-line summary handed to the planner.
    pub fn summary_line(&self) -> String {
        let mut parts = Vec::new();
        if let Some(applicant) = self.applicant_type() {
            parts.push(format!("applicant type: {}", applicant.as_str()));
        }
        if let Some(city) = self.user.city.as_deref().filter(|c| !c.is_empty()) {
            parts.push(format!("city: {}", city));
        }
        if !self.preferences.is_empty() {
            let keys: Vec<&str> = self.preferences.keys().map(String::as_str).collect();
            parts.push(format!("preferences on {}", keys.join(", ")));
        }
        if parts.is_empty() {
            "no profile details".to_string()
        } else {
            parts.join("; ")
        }
    }

    /// Profile section text for the compiled context.
    pub fn to_context_text(&self) -> String {
        let mut out = String::new();
        if let Some(name) = self.user.name.as_deref().filter(|n| !n.is_empty()) {
            out.push_str(&format!("Name: {}\n", name));
        }
        if let Some(city) = self.user.city.as_deref().filter(|c| !c.is_empty()) {
            out.push_str(&format!("City: {}\n", city));
        }
        if let Some(applicant) = self.applicant_type() {
            out.push_str(&format!("Applicant type: {}\n", applicant.as_str()));
        }
        for (key, value) in &self.education.fields {
            out.push_str(&format!("Education {}: {}\n", key, render_value(value)));
        }
        for (key, value) in &self.preferences {
            out.push_str(&format!("Preference {}: {}\n", key, render_value(value)));
        }
        out.trim_end().to_string()
    }
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

/// Stored user file as listed by the profile/document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDocumentRef {
    pub storage_path: String,
    pub doc_type: String,
    #[serde(default)]
    pub mime_type: String,
}

impl UserDocumentRef {
    pub fn filename(&self) -> &str {
        self.storage_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.storage_path)
    }
}

/// Extracted text of one user file.
#[derive(Debug, Clone, PartialEq)]
pub struct UserDocument {
    pub doc_type: String,
    pub filename: String,
    pub text: String,
}

/// A ranked user document together with its similarity to the question.
#[derive(Debug, Clone)]
pub struct RankedUserDocument {
    pub document: UserDocument,
    pub similarity: f32,
}

impl RankedUserDocument {
    /// A document consulted as a whole rather than searched; similarity 1.0.
    pub fn unranked(document: UserDocument) -> Self {
        Self {
            document,
            similarity: 1.0,
        }
    }
}

/// Incoming question plus optional identity and prior conversation.
#[derive(Debug, Clone, Default)]
pub struct Question {
    pub text: String,
    pub user_id: Option<String>,
    pub history: Vec<ChatMessage>,
}

impl Question {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degree_level_parse() {
        assert_eq!(DegreeLevel::parse("B.Sc."), Some(DegreeLevel::Bachelor));
        assert_eq!(DegreeLevel::parse("Bachelor of Arts"), Some(DegreeLevel::Bachelor));
        assert_eq!(DegreeLevel::parse("M.Sc."), Some(DegreeLevel::Master));
        assert_eq!(DegreeLevel::parse("Master"), Some(DegreeLevel::Master));
        assert_eq!(DegreeLevel::parse("Staatsexamen"), None);
        assert_eq!(DegreeLevel::parse(""), None);
    }

    #[test]
    fn test_profile_deserializes_with_extra_fields() {
        let json = r#"{
            "user": {"name": "Alex", "city": "Berlin", "applicant_type": "high-school"},
            "education": {"type": "high-school", "gpa": 1.7, "school": "Gymnasium"},
            "preferences": {"field": "informatics"}
        }"#;
        let profile: UserProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.applicant_type(), Some(ApplicantType::HighSchool));
        assert_eq!(profile.education.fields.len(), 2);

        let text = profile.to_context_text();
        assert!(text.contains("Name: Alex"));
        assert!(text.contains("Education gpa: 1.7"));
        assert!(text.contains("Preference field: informatics"));
    }

    #[test]
    fn test_unknown_applicant_type() {
        let profile: UserProfile =
            serde_json::from_str(r#"{"user": {"applicant_type": "transfer"}}"#).unwrap();
        assert_eq!(profile.applicant_type(), Some(ApplicantType::Other));
        assert_eq!(ApplicantType::Other.implied_degree_level(), None);
    }

    #[test]
    fn test_candidate_row_without_metadata() {
        let row = r#"{"content": "x", "similarity_score": 0.8, "keyword_rank": 0.2, "hybrid_score": 0.62}"#;
        let candidate: RetrievalCandidate = serde_json::from_str(row).unwrap();
        assert!(candidate.embedding.is_none());
        assert_eq!(candidate.metadata.degree_level, None);
        assert!((candidate.hybrid_score - 0.62).abs() < 1e-6);
    }

    #[test]
    fn test_metadata_level_is_lenient() {
        let meta: ChunkMetadata =
            serde_json::from_str(r#"{"university": "TU", "degree_level": "B.Sc."}"#).unwrap();
        assert_eq!(meta.degree_level, Some(DegreeLevel::Bachelor));
        let meta: ChunkMetadata = serde_json::from_str(r#"{"degree_level": null}"#).unwrap();
        assert_eq!(meta.degree_level, None);
    }
}

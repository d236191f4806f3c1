//! Action planning: which data sources a question needs.
//!
//! The language model proposes an action list; the reply is parsed in layers
//! (strict JSON, first `[...]` block, keyword scan) and a keyword heuristic
//! takes over when the model cannot be reached. Knowledge-base enforcement is
//! applied last on every path.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{LlmConfig, VocabularyConfig};
use crate::llm::{ChatMessage, GenerationConfig, LLMProvider};
use crate::rag::retrieval_decision::KeywordSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    FetchProfile,
    FetchUserDocs,
    SearchKb,
    SearchUserDocs,
    Answer,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::FetchProfile,
        Action::FetchUserDocs,
        Action::SearchKb,
        Action::SearchUserDocs,
        Action::Answer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchProfile => "fetch_profile",
            Self::FetchUserDocs => "fetch_user_docs",
            Self::SearchKb => "search_kb",
            Self::SearchUserDocs => "search_user_docs",
            Self::Answer => "answer",
        }
    }

    /// Accepts `search_kb`, `search-kb`, `Search KB` and similar spellings.
    pub fn parse(label: &str) -> Option<Self> {
        let normalized = label.trim().to_lowercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|a| a.as_str() == normalized)
    }
}

/// Ordered, duplicate-free action set that always ends with [`Action::Answer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    actions: Vec<Action>,
}

impl QueryPlan {
    pub fn new(actions: impl IntoIterator<Item = Action>) -> Self {
        let mut ordered = Vec::new();
        for action in actions {
            if action != Action::Answer && !ordered.contains(&action) {
                ordered.push(action);
            }
        }
        ordered.push(Action::Answer);
        Self { actions: ordered }
    }

    /// `[search_kb, answer]`
    pub fn knowledge_base_only() -> Self {
        Self::new([Action::SearchKb])
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn contains(&self, action: Action) -> bool {
        self.actions.contains(&action)
    }

    /// Add `action` before the trailing answer if it is missing.
    pub fn ensure(&mut self, action: Action) {
        if !self.contains(action) {
            let at = self.actions.len() - 1;
            self.actions.insert(at, action);
        }
    }

    pub fn needs_user_documents(&self) -> bool {
        self.contains(Action::FetchUserDocs) || self.contains(Action::SearchUserDocs)
    }
}

impl std::fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let labels: Vec<&str> = self.actions.iter().map(Action::as_str).collect();
        write!(f, "[{}]", labels.join(", "))
    }
}

/// How the final plan was obtained, for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOrigin {
    /// The reply (or a bracketed part of it) was a JSON action list.
    ModelJson,
    /// Action names were scanned out of free text.
    ModelText,
    /// The reply named no known action.
    Default,
    /// The model call failed or timed out.
    Heuristic,
}

#[derive(Debug, Clone)]
pub struct PlanDecision {
    pub plan: QueryPlan,
    pub origin: PlanOrigin,
    /// `search_kb` was added by vocabulary enforcement.
    pub enforced: bool,
}

const PLANNER_SYSTEM_PROMPT: &str = "You route questions for a university admissions assistant.\n\
Choose the data sources needed to answer the question from this list:\n\
- fetch_profile: the applicant's stored profile (education, city, preferences)\n\
- fetch_user_docs: the applicant's uploaded documents\n\
- search_kb: the knowledge base of degree programs, requirements and deadlines\n\
- search_user_docs: search inside the applicant's uploaded documents\n\
- answer: produce the final answer (always last)\n\
Only request personal data when the question is about the applicant.\n\
Reply with a JSON array of action names and nothing else, e.g. [\"search_kb\", \"answer\"].";

static ACTION_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(fetch[_ -]profile|fetch[_ -]user[_ -]docs|search[_ -]kb|search[_ -]user[_ -]docs|answer)\b")
        .expect("action name pattern is valid")
});

pub struct ActionPlanner {
    llm: Arc<dyn LLMProvider>,
    generation: GenerationConfig,
    timeout: Duration,
    kb_triggers: KeywordSet,
    personal: KeywordSet,
}

impl ActionPlanner {
    pub fn new(llm: Arc<dyn LLMProvider>, llm_config: &LlmConfig, vocabulary: &VocabularyConfig) -> Self {
        Self {
            llm,
            generation: GenerationConfig::new(llm_config.planner_max_tokens, llm_config.planner_temperature),
            timeout: Duration::from_secs(llm_config.timeout_secs),
            kb_triggers: KeywordSet::prefixes(&vocabulary.kb_trigger_keywords),
            personal: KeywordSet::new(&vocabulary.personal_keywords),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn plan(&self, question: &str, profile_summary: Option<&str>) -> PlanDecision {
        let messages = planner_messages(question, profile_summary);
        let reply = tokio::time::timeout(self.timeout, self.llm.chat(&messages, &self.generation)).await;

        let (mut plan, origin) = match reply {
            Ok(Ok(text)) => match parse_plan(&text) {
                Some((actions, origin)) => (QueryPlan::new(actions), origin),
                None => {
                    tracing::warn!(reply_len = text.len(), "Planner reply named no actions, using default plan");
                    (QueryPlan::knowledge_base_only(), PlanOrigin::Default)
                }
            },
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Planner model call failed, using keyword heuristic");
                (self.heuristic_plan(question), PlanOrigin::Heuristic)
            }
            Err(_) => {
                tracing::warn!(timeout_secs = self.timeout.as_secs(), "Planner model call timed out, using keyword heuristic");
                (self.heuristic_plan(question), PlanOrigin::Heuristic)
            }
        };

        let enforced = self.enforce(question, &mut plan);
        tracing::info!(plan = %plan, origin = ?origin, enforced = enforced, "Query plan");
        PlanDecision { plan, origin, enforced }
    }

    /// Plan used when the model is unavailable.
    pub fn heuristic_plan(&self, question: &str) -> QueryPlan {
        if self.personal.matches(question) {
            QueryPlan::new([Action::FetchProfile, Action::SearchUserDocs, Action::SearchKb])
        } else {
            QueryPlan::knowledge_base_only()
        }
    }

    /// Admissions vocabulary always searches the knowledge base, whatever the
    /// model said. Returns whether `search_kb` had to be added.
    fn enforce(&self, question: &str, plan: &mut QueryPlan) -> bool {
        if !self.kb_triggers.matches(question) || plan.contains(Action::SearchKb) {
            return false;
        }
        plan.ensure(Action::SearchKb);
        true
    }
}

fn planner_messages(question: &str, profile_summary: Option<&str>) -> Vec<ChatMessage> {
    let mut user = format!("Question: {}", question.trim());
    match profile_summary {
        Some(summary) => user.push_str(&format!("\nApplicant profile: {}", summary)),
        None => user.push_str("\nApplicant profile: not available (anonymous user)"),
    }
    vec![ChatMessage::system(PLANNER_SYSTEM_PROMPT), ChatMessage::user(user)]
}

/// Layered parse of a planner reply; `None` when no action is recognisable.
pub fn parse_plan(output: &str) -> Option<(Vec<Action>, PlanOrigin)> {
    let trimmed = output
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    // Strategy 1: the whole reply is JSON
    if let Some(actions) = parse_json_actions(trimmed) {
        return Some((actions, PlanOrigin::ModelJson));
    }

    // Strategy 2: first JSON array embedded in prose
    if let Some(start) = trimmed.find('[') {
        if let Some(end) = trimmed[start..].find(']') {
            if let Some(actions) = parse_json_actions(&trimmed[start..=start + end]) {
                return Some((actions, PlanOrigin::ModelJson));
            }
        }
    }

    // Strategy 3: action names anywhere in the text, in order of appearance
    let scanned: Vec<Action> = ACTION_NAME
        .find_iter(trimmed)
        .filter_map(|m| Action::parse(m.as_str()))
        .collect();
    if scanned.is_empty() {
        None
    } else {
        Some((scanned, PlanOrigin::ModelText))
    }
}

/// A JSON array of names, or an object with an `actions` array.
fn parse_json_actions(text: &str) -> Option<Vec<Action>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Reply {
        List(Vec<String>),
        Object { actions: Vec<String> },
    }

    let names = match serde_json::from_str::<Reply>(text).ok()? {
        Reply::List(names) | Reply::Object { actions: names } => names,
    };
    let actions: Vec<Action> = names.iter().filter_map(|n| Action::parse(n)).collect();
    if actions.is_empty() {
        None
    } else {
        Some(actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderInfo;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    enum Behaviour {
        Reply(&'static str),
        Fail,
        Hang,
    }

    struct ScriptedLlm(Behaviour);

    #[async_trait]
    impl LLMProvider for ScriptedLlm {
        async fn chat(&self, _messages: &[ChatMessage], _config: &GenerationConfig) -> Result<String> {
            match &self.0 {
                Behaviour::Reply(text) => Ok(text.to_string()),
                Behaviour::Fail => Err(anyhow!("401 Unauthorized")),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok("[]".to_string())
                }
            }
        }

        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "scripted".to_string(),
                model: "none".to_string(),
                is_local: true,
            }
        }
    }

    fn planner(behaviour: Behaviour) -> ActionPlanner {
        ActionPlanner::new(
            Arc::new(ScriptedLlm(behaviour)),
            &LlmConfig::default(),
            &VocabularyConfig::default(),
        )
        .with_timeout(Duration::from_millis(50))
    }

    const DEADLINE_QUESTION: &str = "What is the application deadline for the Informatics Bachelor program?";

    #[test]
    fn test_plan_always_ends_with_answer() {
        let plan = QueryPlan::new([Action::Answer, Action::SearchKb, Action::SearchKb, Action::FetchProfile]);
        assert_eq!(plan.actions(), &[Action::SearchKb, Action::FetchProfile, Action::Answer]);
        assert_eq!(QueryPlan::new([]).actions(), &[Action::Answer]);
        assert_eq!(plan.to_string(), "[search_kb, fetch_profile, answer]");
    }

    #[test]
    fn test_parse_layers() {
        let (actions, origin) = parse_plan(r#"["fetch_profile", "answer"]"#).unwrap();
        assert_eq!(actions, vec![Action::FetchProfile, Action::Answer]);
        assert_eq!(origin, PlanOrigin::ModelJson);

        let (actions, _) = parse_plan("```json\n{\"actions\": [\"search_kb\"]}\n```").unwrap();
        assert_eq!(actions, vec![Action::SearchKb]);

        let (actions, origin) = parse_plan(r#"Sure! Here is the plan: ["search-kb", "answer"] Hope it helps."#).unwrap();
        assert_eq!(actions, vec![Action::SearchKb, Action::Answer]);
        assert_eq!(origin, PlanOrigin::ModelJson);

        let (actions, origin) = parse_plan("I would fetch_profile first, then search_user_docs.").unwrap();
        assert_eq!(actions, vec![Action::FetchProfile, Action::SearchUserDocs]);
        assert_eq!(origin, PlanOrigin::ModelText);

        assert!(parse_plan("no idea").is_none());
        assert!(parse_plan(r#"["lookup"]"#).is_none());
    }

    #[tokio::test]
    async fn test_enforcement_overrides_model_omission() {
        let decision = planner(Behaviour::Reply(r#"["answer"]"#)).plan(DEADLINE_QUESTION, None).await;
        assert!(decision.plan.contains(Action::SearchKb));
        assert!(decision.plan.contains(Action::Answer));
        assert!(decision.enforced);
        assert_eq!(decision.origin, PlanOrigin::ModelJson);
    }

    #[tokio::test]
    async fn test_enforcement_covers_inflected_vocabulary() {
        for question in [
            "Is it too late to be applying to the Informatics programmes?",
            "Which universities accept applicants with a diploma?",
        ] {
            let decision = planner(Behaviour::Reply(r#"["answer"]"#)).plan(question, None).await;
            assert_eq!(decision.plan.actions(), &[Action::SearchKb, Action::Answer], "{}", question);
            assert!(decision.enforced);
        }
    }

    #[tokio::test]
    async fn test_enforcement_after_every_path() {
        for behaviour in [Behaviour::Reply("nonsense"), Behaviour::Fail, Behaviour::Hang] {
            let decision = planner(behaviour).plan(DEADLINE_QUESTION, None).await;
            assert_eq!(decision.plan.actions(), &[Action::SearchKb, Action::Answer]);
        }
    }

    #[tokio::test]
    async fn test_model_plan_kept_when_valid() {
        let decision = planner(Behaviour::Reply(r#"["fetch_profile", "fetch_user_docs", "answer"]"#))
            .plan("Summarise my transcript", Some("applicant type: university"))
            .await;
        assert_eq!(
            decision.plan.actions(),
            &[Action::FetchProfile, Action::FetchUserDocs, Action::Answer]
        );
        assert!(!decision.enforced);
    }

    #[tokio::test]
    async fn test_default_plan_when_reply_has_no_actions() {
        let decision = planner(Behaviour::Reply("I cannot help with that")).plan("Hello there", None).await;
        assert_eq!(decision.origin, PlanOrigin::Default);
        assert_eq!(decision.plan, QueryPlan::knowledge_base_only());
    }

    #[tokio::test]
    async fn test_heuristic_on_model_failure() {
        let decision = planner(Behaviour::Fail).plan("Do my grades qualify?", None).await;
        assert_eq!(decision.origin, PlanOrigin::Heuristic);
        assert_eq!(
            decision.plan.actions(),
            &[Action::FetchProfile, Action::SearchUserDocs, Action::SearchKb, Action::Answer]
        );

        let decision = planner(Behaviour::Hang).plan("Is Berlin expensive?", None).await;
        assert_eq!(decision.origin, PlanOrigin::Heuristic);
        assert_eq!(decision.plan, QueryPlan::knowledge_base_only());
    }

    #[test]
    fn test_personal_words_need_boundaries() {
        let p = planner(Behaviour::Fail);
        assert_eq!(
            p.heuristic_plan("Tell me a mystery"),
            QueryPlan::new([Action::FetchProfile, Action::SearchUserDocs, Action::SearchKb])
        );
        assert_eq!(p.heuristic_plan("Explain mystery novels"), QueryPlan::knowledge_base_only());
    }
}

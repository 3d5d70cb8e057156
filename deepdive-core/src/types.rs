//! Core type definitions for deepdive.
//!
//! Defines the data structures shared by the pipeline nodes and the
//! collaborator services: retrieved hits, search plans, collaborator
//! requests/responses and claim verification results.

use serde::{Deserialize, Serialize};

/// How a single search call matches documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Semantic,
    Keyword,
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchMode::Semantic => write!(f, "semantic"),
            SearchMode::Keyword => write!(f, "keyword"),
        }
    }
}

/// Which query shapes the planner asks the model for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanningMode {
    Semantic,
    Keyword,
    #[default]
    Hybrid,
}

impl std::fmt::Display for PlanningMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanningMode::Semantic => write!(f, "semantic"),
            PlanningMode::Keyword => write!(f, "keyword"),
            PlanningMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl std::str::FromStr for PlanningMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "semantic" => Ok(PlanningMode::Semantic),
            "keyword" => Ok(PlanningMode::Keyword),
            "hybrid" => Ok(PlanningMode::Hybrid),
            other => Err(format!(
                "unknown search mode '{other}' (expected semantic, keyword or hybrid)"
            )),
        }
    }
}

/// Model aliases used by the pipeline.
///
/// The fast model handles clarification, planning, summaries and claim
/// checks; the reasoning model writes the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelAliases {
    pub fast: String,
    pub reasoning: String,
}

impl Default for ModelAliases {
    fn default() -> Self {
        Self {
            fast: "gpt-4o-mini".to_string(),
            reasoning: "o3-mini".to_string(),
        }
    }
}

/// One retrieved-and-enriched conversation held in research memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationHit {
    pub url: String,
    pub summary: String,
    /// Similarity score; 0 for keyword-only hits.
    pub score: f64,
    pub origin: SearchMode,
    /// Full conversation payload as returned by the fetcher.
    pub conversation: serde_json::Value,
    /// Set once compaction has reduced `conversation` to its core fields.
    #[serde(default)]
    pub stripped: bool,
}

impl ConversationHit {
    pub fn new(url: impl Into<String>, origin: SearchMode) -> Self {
        Self {
            url: url.into(),
            summary: String::new(),
            score: 0.0,
            origin,
            conversation: serde_json::Value::Null,
            stripped: false,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn with_conversation(mut self, conversation: serde_json::Value) -> Self {
        self.conversation = conversation;
        self
    }

    pub fn has_summary(&self) -> bool {
        !self.summary.trim().is_empty()
    }
}

/// Optional temporal/order hints a semantic query may carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
}

/// Raw planner output before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedQuery {
    Semantic { query: String, hints: QueryHints },
    Keyword { query: String },
    Hybrid {
        semantic: String,
        hints: QueryHints,
        keyword: String,
    },
}

impl PlannedQuery {
    /// Normalize into one plan per active mode, semantic first.
    pub fn into_plans(self) -> Vec<SearchPlan> {
        match self {
            PlannedQuery::Semantic { query, hints } => {
                vec![SearchPlan::with_hints(SearchMode::Semantic, query, hints)]
            }
            PlannedQuery::Keyword { query } => vec![SearchPlan::new(SearchMode::Keyword, query)],
            PlannedQuery::Hybrid {
                semantic,
                hints,
                keyword,
            } => vec![
                SearchPlan::with_hints(SearchMode::Semantic, semantic, hints.clone()),
                // Keyword half inherits the hints of the pair it came from.
                SearchPlan::with_hints(SearchMode::Keyword, keyword, hints),
            ],
        }
    }
}

/// Normalized, mode-tagged query consumed by one retrieval iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPlan {
    pub mode: SearchMode,
    pub query: String,
    #[serde(flatten)]
    pub hints: QueryHints,
}

impl SearchPlan {
    pub fn new(mode: SearchMode, query: impl Into<String>) -> Self {
        Self {
            mode,
            query: query.into(),
            hints: QueryHints::default(),
        }
    }

    pub fn with_hints(mode: SearchMode, query: impl Into<String>, hints: QueryHints) -> Self {
        Self {
            mode,
            query: query.into(),
            hints,
        }
    }

    /// Build the provider request for this plan.
    pub fn to_request(&self, corpus: &str, limit: usize) -> SearchRequest {
        SearchRequest {
            corpus: corpus.to_string(),
            mode: self.mode,
            query: self.query.clone(),
            created_after: self.hints.created_after.clone(),
            created_before: self.hints.created_before.clone(),
            order_by: self.hints.order_by.clone(),
            limit,
        }
    }
}

/// A search call against the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub corpus: String,
    pub mode: SearchMode,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    pub limit: usize,
}

impl SearchRequest {
    /// A plain semantic search without hints.
    pub fn semantic(corpus: impl Into<String>, query: impl Into<String>, limit: usize) -> Self {
        Self {
            corpus: corpus.into(),
            mode: SearchMode::Semantic,
            query: query.into(),
            created_after: None,
            created_before: None,
            order_by: None,
            limit,
        }
    }
}

/// One search hit as returned by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub summary: String,
}

/// Cache preference passed through to the conversation fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheHint {
    PreferCached,
    Bypass,
}

impl CacheHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheHint::PreferCached => "prefer_cached",
            CacheHint::Bypass => "bypass",
        }
    }
}

/// A request for the full detail of one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheHint>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cache: Some(CacheHint::PreferCached),
        }
    }
}

/// Why the pipeline is calling the model. Used for logging and by test doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmPurpose {
    Clarify,
    PlanSemantic,
    PlanKeyword,
    PlanClaims,
    Summarize,
    Report,
    ExtractClaims,
    VerifyClaim,
}

impl std::fmt::Display for LlmPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LlmPurpose::Clarify => "clarify",
            LlmPurpose::PlanSemantic => "plan_semantic",
            LlmPurpose::PlanKeyword => "plan_keyword",
            LlmPurpose::PlanClaims => "plan_claims",
            LlmPurpose::Summarize => "summarize",
            LlmPurpose::Report => "report",
            LlmPurpose::ExtractClaims => "extract_claims",
            LlmPurpose::VerifyClaim => "verify_claim",
        };
        f.write_str(name)
    }
}

/// One model invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmRequest {
    pub prompt: String,
    pub model: String,
    pub purpose: LlmPurpose,
}

impl LlmRequest {
    pub fn new(purpose: LlmPurpose, model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            purpose,
        }
    }
}

/// Outcome of checking one claim against retrieved evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimVerificationResult {
    pub claim: String,
    pub supported: bool,
    /// Evidence summary on success, the failure message otherwise.
    pub evidence: String,
}

/// Aggregate of one verification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub total: usize,
    pub supported: Vec<String>,
    pub unsupported: Vec<String>,
}

impl VerificationSummary {
    pub fn from_results(results: &[ClaimVerificationResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            if result.supported {
                summary.supported.push(result.claim.clone());
            } else {
                summary.unsupported.push(result.claim.clone());
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planning_mode_from_str() {
        assert_eq!("Hybrid".parse::<PlanningMode>(), Ok(PlanningMode::Hybrid));
        assert_eq!("keyword".parse::<PlanningMode>(), Ok(PlanningMode::Keyword));
        assert!("fuzzy".parse::<PlanningMode>().is_err());
    }

    #[test]
    fn test_hybrid_plan_normalizes_to_two_plans() {
        let planned = PlannedQuery::Hybrid {
            semantic: "flaky login tests".into(),
            hints: QueryHints {
                created_after: Some("2024-01-01".into()),
                ..Default::default()
            },
            keyword: "login flaky".into(),
        };
        let plans = planned.into_plans();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].mode, SearchMode::Semantic);
        assert_eq!(plans[1].mode, SearchMode::Keyword);
        assert_eq!(plans[1].hints.created_after.as_deref(), Some("2024-01-01"));
    }

    #[test]
    fn test_plan_to_request_carries_hints() {
        let plan = SearchPlan::with_hints(
            SearchMode::Semantic,
            "cache eviction",
            QueryHints {
                order_by: Some("created".into()),
                ..Default::default()
            },
        );
        let req = plan.to_request("acme/app", 10);
        assert_eq!(req.corpus, "acme/app");
        assert_eq!(req.limit, 10);
        assert_eq!(req.order_by.as_deref(), Some("created"));
        assert!(req.created_after.is_none());
    }

    #[test]
    fn test_search_result_defaults_missing_fields() {
        let r: SearchResult = serde_json::from_str(r#"{"url":"u1"}"#).unwrap();
        assert_eq!(r.score, 0.0);
        assert!(r.summary.is_empty());
    }

    #[test]
    fn test_verification_summary_partitions() {
        let results = vec![
            ClaimVerificationResult {
                claim: "a".into(),
                supported: true,
                evidence: String::new(),
            },
            ClaimVerificationResult {
                claim: "b".into(),
                supported: false,
                evidence: String::new(),
            },
        ];
        let summary = VerificationSummary::from_results(&results);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.supported, vec!["a".to_string()]);
        assert_eq!(summary.unsupported, vec!["b".to_string()]);
    }
}

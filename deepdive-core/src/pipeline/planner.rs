//! Planner: decides what to search next, or that research is done.
//!
//! Priority on every invocation:
//! 1. unsupported claims from verification override normal planning;
//! 2. an exhausted depth budget ends research;
//! 3. otherwise queries are generated for the configured mode.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::Action;
use super::prompts::{
    claims_plan_prompt, keyword_plan_prompt, semantic_plan_prompt, strip_code_fences,
};
use crate::context::ResearchContext;
use crate::engine::Node;
use crate::error::Result;
use crate::services::Services;
use crate::types::{LlmPurpose, LlmRequest, PlannedQuery, PlanningMode, QueryHints, SearchPlan};

/// Maximum terms (operators and quoted phrases included) in a keyword query.
pub const MAX_KEYWORD_TERMS: usize = 5;

/// Qualifiers recognised in legacy plain-string queries.
const LEGACY_QUALIFIERS: &[&str] = &[
    "repo", "org", "author", "is", "label", "state", "created", "updated", "in",
];

#[derive(Debug, Deserialize)]
struct SemanticReply {
    query: String,
    #[serde(default)]
    created_after: Option<String>,
    #[serde(default)]
    created_before: Option<String>,
    #[serde(default)]
    order_by: Option<String>,
}

/// Read a semantic planning reply. Falls back to the raw text as the query.
pub fn parse_semantic(reply: &str) -> (String, QueryHints) {
    let body = strip_code_fences(reply);
    if let Ok(parsed) = serde_json::from_str::<SemanticReply>(body) {
        let hints = QueryHints {
            created_after: non_empty(parsed.created_after),
            created_before: non_empty(parsed.created_before),
            order_by: non_empty(parsed.order_by),
        };
        return (parsed.query.trim().to_string(), hints);
    }
    if let Ok(serde_json::Value::String(query)) = serde_json::from_str(body) {
        return (query.trim().to_string(), QueryHints::default());
    }
    (body.to_string(), QueryHints::default())
}

/// Read a keyword planning reply and cap it at [`MAX_KEYWORD_TERMS`].
pub fn parse_keyword(reply: &str) -> String {
    let body = strip_code_fences(reply);
    let query = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(serde_json::Value::Object(map)) => match map.get("query") {
            Some(serde_json::Value::String(s)) => s.clone(),
            _ => body.to_string(),
        },
        _ => body.to_string(),
    };
    truncate_keyword_terms(&query, MAX_KEYWORD_TERMS)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Split a keyword query into terms; a quoted phrase is a single term.
pub fn keyword_terms(query: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in query.chars() {
        match c {
            '"' => {
                current.push(c);
                in_quotes = !in_quotes;
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    terms.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        terms.push(current);
    }
    terms
}

pub fn truncate_keyword_terms(query: &str, max: usize) -> String {
    keyword_terms(query)
        .into_iter()
        .take(max)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Best-effort `key:value` qualifier extraction from a plain query string.
pub fn extract_qualifiers(query: &str) -> Vec<(String, String)> {
    keyword_terms(query)
        .into_iter()
        .filter_map(|term| {
            let term = term.trim_start_matches('-');
            let (key, value) = term.split_once(':')?;
            let key = key.to_ascii_lowercase();
            if LEGACY_QUALIFIERS.contains(&key.as_str()) && !value.is_empty() {
                Some((key, value.trim_matches('"').to_string()))
            } else {
                None
            }
        })
        .collect()
}

pub enum PlannerWork {
    /// Depth budget spent and nothing left to fix.
    Done,
    Claims {
        request: LlmRequest,
        keyword: bool,
        fallback_query: String,
    },
    Generate {
        mode: PlanningMode,
        semantic: LlmRequest,
        keyword: LlmRequest,
        fallback_query: String,
    },
}

pub struct Planner {
    services: Services,
    mode: PlanningMode,
}

impl Planner {
    pub fn new(services: Services, mode: PlanningMode) -> Self {
        Self { services, mode }
    }

    async fn ask(&self, request: LlmRequest) -> Result<String> {
        Ok(self.services.llm.invoke(request).await?)
    }

    async fn semantic(&self, request: LlmRequest) -> Result<(String, QueryHints)> {
        let reply = self.ask(request).await?;
        let (query, hints) = parse_semantic(&reply);
        log_qualifiers(&query);
        Ok((query, hints))
    }

    async fn keyword(&self, request: LlmRequest) -> Result<String> {
        let reply = self.ask(request).await?;
        let query = parse_keyword(&reply);
        log_qualifiers(&query);
        Ok(query)
    }
}

fn log_qualifiers(query: &str) {
    let qualifiers = extract_qualifiers(query);
    if !qualifiers.is_empty() {
        debug!(query, ?qualifiers, "Query carries inline qualifiers");
    }
}

fn or_fallback(query: String, fallback: &str) -> String {
    if query.trim().is_empty() {
        fallback.to_string()
    } else {
        query
    }
}

#[async_trait]
impl Node<ResearchContext, Action> for Planner {
    type Prep = PlannerWork;
    type Exec = Option<Vec<SearchPlan>>;

    fn name(&self) -> &'static str {
        "planner"
    }

    async fn prep(&self, ctx: &ResearchContext) -> Result<PlannerWork> {
        let model = &ctx.models.fast;

        if !ctx.unsupported_claims.is_empty() {
            let keyword = self.mode == PlanningMode::Keyword;
            let purpose = LlmPurpose::PlanClaims;
            let prompt = claims_plan_prompt(&ctx.request, &ctx.unsupported_claims, keyword);
            return Ok(PlannerWork::Claims {
                request: LlmRequest::new(purpose, model, prompt),
                keyword,
                fallback_query: ctx.unsupported_claims.join(" "),
            });
        }

        if ctx.depth.is_exhausted() {
            return Ok(PlannerWork::Done);
        }

        let notes = &ctx.memory.notes;
        let queries = &ctx.memory.search_queries;
        Ok(PlannerWork::Generate {
            mode: self.mode,
            semantic: LlmRequest::new(
                LlmPurpose::PlanSemantic,
                model,
                semantic_plan_prompt(&ctx.request, &ctx.clarifications, notes, queries),
            ),
            keyword: LlmRequest::new(
                LlmPurpose::PlanKeyword,
                model,
                keyword_plan_prompt(&ctx.request, &ctx.clarifications, notes, queries),
            ),
            fallback_query: ctx.request.clone(),
        })
    }

    async fn exec(&self, work: PlannerWork) -> Result<Option<Vec<SearchPlan>>> {
        let planned = match work {
            PlannerWork::Done => return Ok(None),
            PlannerWork::Claims {
                request,
                keyword,
                fallback_query,
            } => {
                if keyword {
                    let query = self.keyword(request).await?;
                    PlannedQuery::Keyword {
                        query: or_fallback(query, &fallback_query),
                    }
                } else {
                    let (query, hints) = self.semantic(request).await?;
                    PlannedQuery::Semantic {
                        query: or_fallback(query, &fallback_query),
                        hints,
                    }
                }
            }
            PlannerWork::Generate {
                mode,
                semantic,
                keyword,
                fallback_query,
            } => match mode {
                PlanningMode::Semantic => {
                    let (query, hints) = self.semantic(semantic).await?;
                    PlannedQuery::Semantic {
                        query: or_fallback(query, &fallback_query),
                        hints,
                    }
                }
                PlanningMode::Keyword => PlannedQuery::Keyword {
                    query: or_fallback(self.keyword(keyword).await?, &fallback_query),
                },
                PlanningMode::Hybrid => {
                    let ((sem_query, hints), kw_query) =
                        tokio::try_join!(self.semantic(semantic), self.keyword(keyword))?;
                    PlannedQuery::Hybrid {
                        semantic: or_fallback(sem_query, &fallback_query),
                        hints,
                        keyword: or_fallback(kw_query, &fallback_query),
                    }
                }
            },
        };
        Ok(Some(planned.into_plans()))
    }

    async fn post(
        &self,
        ctx: &mut ResearchContext,
        plans: Option<Vec<SearchPlan>>,
    ) -> Result<Action> {
        let Some(plans) = plans else {
            info!(
                node = "planner",
                depth = ctx.depth.current(),
                "Depth budget spent; moving to report"
            );
            return Ok(Action::Final);
        };

        info!(
            node = "planner",
            depth = ctx.depth.current(),
            plans = plans.len(),
            fixing_claims = !ctx.unsupported_claims.is_empty(),
            "Planned next searches"
        );
        for plan in &plans {
            debug!(mode = %plan.mode, query = %plan.query, "Search plan");
        }
        ctx.pending_plans = plans;
        Ok(Action::Search)
    }
}

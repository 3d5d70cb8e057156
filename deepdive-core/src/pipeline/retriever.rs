//! Retriever: runs the pending search plans and enriches new hits.
//!
//! Plan searches and hit enrichment go through a [`Fanout`], so the same
//! node serves as the sequential retriever and, backed by a worker pool, as
//! the parallel one. Merging, dedup and every context update happen in
//! `post` on the driving task.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use super::prompts::{SUMMARY_INPUT_CHARS, summarize_prompt, truncate_chars};
use super::{Action, Stage};
use crate::context::ResearchContext;
use crate::engine::{Fanout, Node};
use crate::error::{FetchError, Result};
use crate::services::Services;
use crate::types::{
    ConversationHit, FetchRequest, LlmPurpose, LlmRequest, SearchMode, SearchPlan, SearchRequest,
    SearchResult,
};

/// Results requested when probing the corpus for an existing summary.
const SUMMARY_PROBE_LIMIT: usize = 5;

/// A search result merged across plans, not yet fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub url: String,
    pub score: f64,
    pub summary: String,
    pub origin: SearchMode,
}

/// Merge per-plan results by url, keeping first-seen order.
///
/// On a duplicate the higher score wins; on an exact tie the semantic hit
/// wins. A winner without a summary inherits the loser's.
pub fn merge_results(per_plan: Vec<(SearchMode, Vec<SearchResult>)>) -> Vec<Candidate> {
    let mut merged: Vec<Candidate> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (mode, results) in per_plan {
        for result in results {
            let incoming = Candidate {
                url: result.url,
                score: result.score,
                summary: result.summary,
                origin: mode,
            };
            match index.get(&incoming.url).copied() {
                None => {
                    index.insert(incoming.url.clone(), merged.len());
                    merged.push(incoming);
                }
                Some(pos) => {
                    let existing = &mut merged[pos];
                    let wins = incoming.score > existing.score
                        || (incoming.score == existing.score
                            && incoming.origin == SearchMode::Semantic
                            && existing.origin != SearchMode::Semantic);
                    if wins {
                        let fallback_summary = std::mem::take(&mut existing.summary);
                        *existing = incoming;
                        if existing.summary.trim().is_empty() {
                            existing.summary = fallback_summary;
                        }
                    } else if existing.summary.trim().is_empty() {
                        existing.summary = incoming.summary;
                    }
                }
            }
        }
    }
    merged
}

/// Owned handles a worker needs to fetch and summarize one conversation.
#[derive(Clone)]
pub(crate) struct Enricher {
    services: Services,
    corpus: String,
    fast_model: String,
}

impl Enricher {
    pub(crate) fn new(services: Services, corpus: String, fast_model: String) -> Self {
        Self {
            services,
            corpus,
            fast_model,
        }
    }

    pub(crate) async fn fetch(&self, url: &str) -> std::result::Result<serde_json::Value, FetchError> {
        self.services.fetcher.fetch(FetchRequest::new(url)).await
    }

    /// Fetch detail and fill in a missing summary. `None` if the fetch fails.
    pub(crate) async fn enrich(&self, candidate: Candidate) -> Option<ConversationHit> {
        let conversation = match self.fetch(&candidate.url).await {
            Ok(value) => value,
            Err(e) => {
                warn!(url = %candidate.url, error = %e, "Dropping hit: fetch failed");
                return None;
            }
        };

        let mut summary = candidate.summary;
        if summary.trim().is_empty() {
            summary = self.find_summary(&candidate.url, &conversation).await;
        }

        Some(
            ConversationHit::new(candidate.url, candidate.origin)
                .with_score(candidate.score)
                .with_summary(summary)
                .with_conversation(conversation),
        )
    }

    /// Look for a stored summary first, then ask the fast model. Empty if both fail.
    async fn find_summary(&self, url: &str, conversation: &serde_json::Value) -> String {
        let probe = SearchRequest::semantic(&self.corpus, url, SUMMARY_PROBE_LIMIT);
        match self.services.search.search(probe).await {
            Ok(results) => {
                if let Some(found) = results
                    .into_iter()
                    .find(|r| r.url == url && !r.summary.trim().is_empty())
                {
                    debug!(url, "Summary found by corpus probe");
                    return found.summary;
                }
            }
            Err(e) => debug!(url, error = %e, "Summary probe failed"),
        }

        let content = serde_json::to_string(conversation).unwrap_or_default();
        let prompt = summarize_prompt(url, truncate_chars(&content, SUMMARY_INPUT_CHARS));
        let request = LlmRequest::new(LlmPurpose::Summarize, &self.fast_model, prompt);
        match self.services.llm.invoke(request).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(url, error = %e, "Summary synthesis failed");
                String::new()
            }
        }
    }
}

pub struct RetrievalWork {
    plans: Vec<SearchPlan>,
    known: HashSet<String>,
    corpus: String,
    fast_model: String,
    limit: usize,
}

pub struct RetrievalOutcome {
    queries: Vec<String>,
    hits: Vec<ConversationHit>,
    failed_searches: usize,
}

pub struct Retriever {
    services: Services,
    fanout: Fanout,
}

impl Retriever {
    pub fn new(services: Services, fanout: Fanout) -> Self {
        Self { services, fanout }
    }
}

#[async_trait]
impl Node<ResearchContext, Action> for Retriever {
    type Prep = RetrievalWork;
    type Exec = RetrievalOutcome;

    fn name(&self) -> &'static str {
        "retriever"
    }

    async fn prep(&self, ctx: &ResearchContext) -> Result<RetrievalWork> {
        Ok(RetrievalWork {
            plans: ctx.pending_plans.clone(),
            known: ctx.memory.hits().iter().map(|h| h.url.clone()).collect(),
            corpus: ctx.corpus.clone(),
            fast_model: ctx.models.fast.clone(),
            limit: ctx.max_results,
        })
    }

    async fn exec(&self, work: RetrievalWork) -> Result<RetrievalOutcome> {
        let queries: Vec<String> = work.plans.iter().map(|p| p.query.clone()).collect();
        let requests: Vec<SearchRequest> = work
            .plans
            .iter()
            .map(|p| p.to_request(&work.corpus, work.limit))
            .collect();

        let search = self.services.search.clone();
        let searched = self
            .fanout
            .map("retriever.search", requests, move |request| {
                let search = search.clone();
                async move {
                    let mode = request.mode;
                    let query = request.query.clone();
                    match search.search(request).await {
                        Ok(results) => Some((mode, results)),
                        Err(e) => {
                            warn!(query = %query, mode = %mode, error = %e, "Plan search failed");
                            None
                        }
                    }
                }
            })
            .await?;

        let failed_searches = searched.iter().filter(|r| r.is_none()).count();
        let candidates: Vec<Candidate> = merge_results(searched.into_iter().flatten().collect())
            .into_iter()
            .filter(|c| !work.known.contains(&c.url))
            .collect();
        debug!(new_candidates = candidates.len(), "Merged plan results");

        let enricher = Enricher::new(self.services.clone(), work.corpus, work.fast_model);
        let hits = self
            .fanout
            .map("retriever.enrich", candidates, move |candidate| {
                let enricher = enricher.clone();
                async move { enricher.enrich(candidate).await }
            })
            .await?
            .into_iter()
            .flatten()
            .collect();

        Ok(RetrievalOutcome {
            queries,
            hits,
            failed_searches,
        })
    }

    async fn post(&self, ctx: &mut ResearchContext, outcome: RetrievalOutcome) -> Result<Action> {
        let added = outcome
            .hits
            .into_iter()
            .filter(|hit| ctx.memory.insert_hit(hit.clone()))
            .count();

        ctx.depth.advance();
        ctx.memory.notes.push(format!(
            "Iteration {}: {} new conversations from {} queries ({})",
            ctx.depth.current(),
            added,
            outcome.queries.len(),
            outcome.queries.join(" | ")
        ));
        ctx.memory.search_queries.extend(outcome.queries);
        ctx.pending_plans.clear();
        ctx.unsupported_claims.clear();
        if added > 0 && ctx.proceed_anyway {
            // New evidence gets a fresh chance at compaction.
            debug!(added, "Clearing proceed-anyway after new hits");
            ctx.proceed_anyway = false;
        }

        let action = if !ctx.depth.is_exhausted() && added > 0 {
            Action::Continue
        } else {
            Action::Final
        };
        info!(
            node = ?Stage::Retriever,
            depth = ctx.depth.current(),
            added,
            hits = ctx.memory.len(),
            failed_searches = outcome.failed_searches,
            action = ?action,
            "Retrieval iteration complete"
        );
        Ok(action)
    }
}

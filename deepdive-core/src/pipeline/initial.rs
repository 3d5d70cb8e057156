//! InitialResearch: seeds memory with one semantic search on the request.

use async_trait::async_trait;
use tracing::{info, warn};

use super::Action;
use super::retriever::Enricher;
use crate::context::ResearchContext;
use crate::engine::Node;
use crate::error::Result;
use crate::services::Services;
use crate::types::{ConversationHit, SearchMode, SearchRequest};

pub struct SeedQuery {
    request: SearchRequest,
    fast_model: String,
}

pub struct InitialResearch {
    services: Services,
}

impl InitialResearch {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Node<ResearchContext, Action> for InitialResearch {
    type Prep = SeedQuery;
    type Exec = Vec<ConversationHit>;

    fn name(&self) -> &'static str {
        "initial_research"
    }

    async fn prep(&self, ctx: &ResearchContext) -> Result<SeedQuery> {
        Ok(SeedQuery {
            request: SearchRequest::semantic(&ctx.corpus, &ctx.request, ctx.max_results),
            fast_model: ctx.models.fast.clone(),
        })
    }

    async fn exec(&self, seed: SeedQuery) -> Result<Vec<ConversationHit>> {
        let corpus = seed.request.corpus.clone();
        let results = match self.services.search.search(seed.request).await {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "Initial search failed; starting with an empty seed");
                return Ok(Vec::new());
            }
        };

        let enricher = Enricher::new(self.services.clone(), corpus, seed.fast_model);
        let mut hits = Vec::with_capacity(results.len());
        for result in results {
            match enricher.fetch(&result.url).await {
                Ok(conversation) => hits.push(
                    ConversationHit::new(result.url, SearchMode::Semantic)
                        .with_score(result.score)
                        .with_summary(result.summary)
                        .with_conversation(conversation),
                ),
                Err(e) => warn!(url = %result.url, error = %e, "Dropping seed hit: fetch failed"),
            }
        }
        Ok(hits)
    }

    async fn post(&self, ctx: &mut ResearchContext, hits: Vec<ConversationHit>) -> Result<Action> {
        for hit in hits {
            ctx.memory.insert_hit(hit);
        }
        ctx.memory.notes.clear();
        ctx.memory.search_queries = vec![ctx.request.clone()];
        info!(node = "initial_research", hits = ctx.memory.len(), "Seeded research memory");
        Ok(Action::Default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResearchConfig;
    use crate::engine::run_node;
    use crate::error::SearchError;
    use crate::services::mock::{MockCorpus, MockLlmInvoker};
    use std::sync::Arc;

    fn setup() -> (Arc<MockCorpus>, InitialResearch, ResearchContext) {
        let corpus = Arc::new(MockCorpus::new());
        let llm = Arc::new(MockLlmInvoker::new());
        let node = InitialResearch::new(Services::new(corpus.clone(), corpus.clone(), llm));
        let config = ResearchConfig {
            corpus: "acme/app".into(),
            max_results: 3,
            ..Default::default()
        };
        (corpus, node, ResearchContext::new("slow CI", &config))
    }

    #[tokio::test]
    async fn test_seeds_hits_and_queries() {
        let (corpus, node, mut ctx) = setup();
        for i in 0..5 {
            corpus.add_document(format!("u{i}"), "s", 0.5);
        }
        corpus.fail_fetch("u1");

        assert_eq!(run_node(&node, &mut ctx).await.unwrap(), Action::Default);
        let urls: Vec<_> = ctx.memory.hits().iter().map(|h| h.url.as_str()).collect();
        assert_eq!(urls, vec!["u0", "u2"]);
        assert_eq!(ctx.memory.search_queries, vec!["slow CI".to_string()]);
        assert!(ctx.memory.notes.is_empty());

        let searches = corpus.searches();
        assert_eq!(searches.len(), 1);
        assert_eq!(searches[0].mode, SearchMode::Semantic);
        assert_eq!(searches[0].limit, 3);
        assert_eq!(searches[0].query, "slow CI");
    }

    #[tokio::test]
    async fn test_search_failure_yields_empty_seed() {
        let (corpus, node, mut ctx) = setup();
        corpus.queue_search_error(SearchError::UnknownCorpus {
            corpus: "acme/app".into(),
        });
        assert_eq!(run_node(&node, &mut ctx).await.unwrap(), Action::Default);
        assert!(ctx.memory.is_empty());
        assert_eq!(ctx.memory.search_queries.len(), 1);
    }
}

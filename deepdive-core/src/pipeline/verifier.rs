//! ClaimVerifier: checks a draft's claims against the corpus.
//!
//! A [`BatchNode`]: `prep` captures the draft, claims are extracted in
//! `split`, each claim is searched for and judged in `exec_item`, and `post`
//! routes on the aggregate. Wrap it
//! in [`Batch`](crate::engine::Batch) or
//! [`ParallelBatch`](crate::engine::ParallelBatch).

use async_trait::async_trait;
use std::fmt::Write as _;
use tracing::{debug, info, warn};

use super::Action;
use super::prompts::{extract_claims_prompt, strip_code_fences, verify_claim_prompt};
use crate::config::MAX_CLAIMS_LIMIT;
use crate::context::ResearchContext;
use crate::engine::BatchNode;
use crate::error::Result;
use crate::services::Services;
use crate::types::{
    ClaimVerificationResult, LlmPurpose, LlmRequest, SearchRequest, VerificationSummary,
};

/// Parse the claim list. Anything but a JSON array of strings yields no claims.
pub fn parse_claims(reply: &str, max: usize) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(strip_code_fences(reply)) {
        Ok(claims) => claims
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .take(max.min(MAX_CLAIMS_LIMIT))
            .collect(),
        Err(e) => {
            debug!(error = %e, "Claim list was not a JSON array of strings");
            Vec::new()
        }
    }
}

/// Only an exact SUPPORTED (any case, surrounding whitespace ignored) counts.
pub fn is_supported(reply: &str) -> bool {
    reply.trim().eq_ignore_ascii_case("SUPPORTED")
}

/// The draft to check, with what claim extraction needs.
pub struct ClaimSource {
    draft: Option<String>,
    corpus: String,
    model: String,
}

/// One claim with everything a worker needs to check it.
pub struct ClaimCheck {
    claim: String,
    corpus: String,
    model: String,
}

pub struct ClaimVerifier {
    services: Services,
    evidence_limit: usize,
    max_claims: usize,
}

impl ClaimVerifier {
    pub fn new(services: Services, evidence_limit: usize, max_claims: usize) -> Self {
        Self {
            services,
            evidence_limit,
            max_claims,
        }
    }

    fn unsupported(claim: String, reason: impl Into<String>) -> ClaimVerificationResult {
        ClaimVerificationResult {
            claim,
            supported: false,
            evidence: reason.into(),
        }
    }
}

#[async_trait]
impl BatchNode<ResearchContext, Action> for ClaimVerifier {
    type Source = ClaimSource;
    type Item = ClaimCheck;
    type Output = ClaimVerificationResult;

    fn name(&self) -> &'static str {
        "claim_verifier"
    }

    async fn prep(&self, ctx: &ResearchContext) -> Result<ClaimSource> {
        Ok(ClaimSource {
            draft: ctx.draft_answer.clone(),
            corpus: ctx.corpus.clone(),
            model: ctx.models.fast.clone(),
        })
    }

    async fn split(&self, source: ClaimSource) -> Result<Vec<ClaimCheck>> {
        let Some(draft) = source.draft.as_deref() else {
            return Ok(Vec::new());
        };

        let request = LlmRequest::new(
            LlmPurpose::ExtractClaims,
            &source.model,
            extract_claims_prompt(draft, self.max_claims),
        );
        let claims = match self.services.llm.invoke(request).await {
            Ok(reply) => parse_claims(&reply, self.max_claims),
            Err(e) => {
                warn!(error = %e, "Claim extraction failed; treating draft as claim-free");
                Vec::new()
            }
        };
        debug!(claims = claims.len(), "Extracted claims");

        Ok(claims
            .into_iter()
            .map(|claim| ClaimCheck {
                claim,
                corpus: source.corpus.clone(),
                model: source.model.clone(),
            })
            .collect())
    }

    async fn exec_item(&self, check: ClaimCheck) -> Result<ClaimVerificationResult> {
        let search = SearchRequest::semantic(&check.corpus, &check.claim, self.evidence_limit);
        let results = match self.services.search.search(search).await {
            Ok(results) => results,
            Err(e) => return Ok(Self::unsupported(check.claim, e.to_string())),
        };
        if results.is_empty() {
            return Ok(Self::unsupported(check.claim, "no evidence found"));
        }

        let mut evidence = String::new();
        for r in &results {
            let _ = writeln!(evidence, "- {}: {}", r.url, r.summary);
        }

        let request = LlmRequest::new(
            LlmPurpose::VerifyClaim,
            check.model,
            verify_claim_prompt(&check.claim, &evidence),
        );
        match self.services.llm.invoke(request).await {
            Ok(reply) => Ok(ClaimVerificationResult {
                supported: is_supported(&reply),
                claim: check.claim,
                evidence,
            }),
            Err(e) => Ok(Self::unsupported(check.claim, e.to_string())),
        }
    }

    async fn post(
        &self,
        ctx: &mut ResearchContext,
        results: Vec<ClaimVerificationResult>,
    ) -> Result<Action> {
        let summary = VerificationSummary::from_results(&results);
        let unsupported = summary.unsupported.clone();
        info!(
            node = "claim_verifier",
            total = summary.total,
            unsupported = unsupported.len(),
            attempt = ctx.verification_attempts.used(),
            "Verification pass complete"
        );
        ctx.claim_verification = Some(summary);

        if unsupported.is_empty() {
            ctx.draft_verified = true;
            return Ok(Action::Ok);
        }

        if ctx.verification_attempts.try_increment() {
            ctx.unsupported_claims = unsupported;
            ctx.draft_verified = false;
            return Ok(Action::Fix);
        }

        // Budget spent: keep the draft and disclose what could not be confirmed.
        ctx.draft_verified = true;
        Ok(Action::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResearchConfig;
    use crate::engine::{Batch, ParallelBatch, WorkerPool, run_node};
    use crate::error::{LlmError, SearchError};
    use crate::services::mock::{MockCorpus, MockLlmInvoker};
    use std::sync::Arc;

    struct Fixture {
        corpus: Arc<MockCorpus>,
        llm: Arc<MockLlmInvoker>,
        ctx: ResearchContext,
    }

    fn fixture() -> Fixture {
        let corpus = Arc::new(MockCorpus::new());
        corpus.add_document("u1", "evidence one", 0.9);
        let llm = Arc::new(MockLlmInvoker::new());
        let mut ctx = ResearchContext::new("q", &ResearchConfig::default());
        ctx.draft_answer = Some("Draft with claims".into());
        Fixture { corpus, llm, ctx }
    }

    fn verifier(f: &Fixture) -> ClaimVerifier {
        ClaimVerifier::new(
            Services::new(f.corpus.clone(), f.corpus.clone(), f.llm.clone()),
            3,
            25,
        )
    }

    #[test]
    fn test_parse_claims_contract() {
        assert_eq!(parse_claims("```json\n[\"a\", \"b\"]\n```", 25), vec!["a", "b"]);
        assert!(parse_claims("not json", 25).is_empty());
        assert!(parse_claims("{\"claims\": [\"a\"]}", 25).is_empty());
        assert!(parse_claims("[1, 2]", 25).is_empty());

        let many = serde_json::to_string(&(0..40).map(|i| format!("c{i}")).collect::<Vec<_>>())
            .unwrap();
        assert_eq!(parse_claims(&many, 25).len(), 25);
        assert_eq!(parse_claims(&many, 100).len(), 25);
    }

    #[test]
    fn test_is_supported_exact_token_only() {
        assert!(is_supported("SUPPORTED"));
        assert!(is_supported("  supported\n"));
        assert!(!is_supported("UNSUPPORTED"));
        assert!(!is_supported("SUPPORTED."));
        assert!(!is_supported("Likely SUPPORTED"));
        assert!(!is_supported(""));
    }

    #[tokio::test]
    async fn test_prep_only_reads_state() {
        let f = fixture();
        f.llm.queue_response(LlmPurpose::ExtractClaims, r#"["a", "b"]"#);
        let node = verifier(&f);

        let source = node.prep(&f.ctx).await.unwrap();
        assert!(f.llm.calls().is_empty());

        let checks = node.split(source).await.unwrap();
        assert_eq!(checks.len(), 2);
        assert_eq!(f.llm.call_count(LlmPurpose::ExtractClaims), 1);
    }

    #[tokio::test]
    async fn test_all_supported_marks_verified() {
        let mut f = fixture();
        f.llm.queue_response(LlmPurpose::ExtractClaims, r#"["a", "b"]"#);
        f.llm.set_default(LlmPurpose::VerifyClaim, "SUPPORTED");

        let action = run_node(&Batch::new(verifier(&f)), &mut f.ctx).await.unwrap();
        assert_eq!(action, Action::Ok);
        assert!(f.ctx.draft_verified);
        assert_eq!(f.ctx.verification_attempts.used(), 0);
        assert_eq!(f.ctx.claim_verification.as_ref().unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_unsupported_first_pass_fixes() {
        let mut f = fixture();
        f.llm.queue_response(LlmPurpose::ExtractClaims, r#"["a", "b", "c"]"#);
        f.llm.queue_response(LlmPurpose::VerifyClaim, "SUPPORTED");
        f.llm.queue_response(LlmPurpose::VerifyClaim, "UNSUPPORTED");
        f.llm.queue_response(LlmPurpose::VerifyClaim, "maybe");

        let action = run_node(&Batch::new(verifier(&f)), &mut f.ctx).await.unwrap();
        assert_eq!(action, Action::Fix);
        assert_eq!(f.ctx.unsupported_claims, vec!["b", "c"]);
        assert_eq!(f.ctx.verification_attempts.used(), 1);
        assert!(!f.ctx.draft_verified);
    }

    #[tokio::test]
    async fn test_budget_exhausted_keeps_unsupported_for_disclosure() {
        let mut f = fixture();
        assert!(f.ctx.verification_attempts.try_increment());
        f.llm.queue_response(LlmPurpose::ExtractClaims, r#"["a"]"#);
        f.llm.set_default(LlmPurpose::VerifyClaim, "UNSUPPORTED");

        let action = run_node(&Batch::new(verifier(&f)), &mut f.ctx).await.unwrap();
        assert_eq!(action, Action::Ok);
        assert!(f.ctx.draft_verified);
        assert!(f.ctx.unsupported_claims.is_empty());
        assert_eq!(
            f.ctx.claim_verification.as_ref().unwrap().unsupported,
            vec!["a".to_string()]
        );
    }

    #[tokio::test]
    async fn test_extraction_failure_means_no_claims() {
        let mut f = fixture();
        f.llm.queue_error(
            LlmPurpose::ExtractClaims,
            LlmError::RateLimited {
                message: "slow down".into(),
            },
        );
        let action = run_node(&Batch::new(verifier(&f)), &mut f.ctx).await.unwrap();
        assert_eq!(action, Action::Ok);
        assert_eq!(f.ctx.claim_verification.as_ref().unwrap().total, 0);
        assert_eq!(f.llm.call_count(LlmPurpose::VerifyClaim), 0);
    }

    #[tokio::test]
    async fn test_search_failure_is_unsupported() {
        let mut f = fixture();
        f.llm.queue_response(LlmPurpose::ExtractClaims, r#"["a"]"#);
        f.corpus.queue_search_error(SearchError::Request {
            message: "offline".into(),
        });
        let action = run_node(&Batch::new(verifier(&f)), &mut f.ctx).await.unwrap();
        assert_eq!(action, Action::Fix);
        assert_eq!(f.llm.call_count(LlmPurpose::VerifyClaim), 0);
    }

    #[tokio::test]
    async fn test_parallel_verifier_matches_sequential_order() {
        let mut f = fixture();
        let claims: Vec<String> = (0..10).map(|i| format!("claim {i}")).collect();
        f.llm
            .queue_response(LlmPurpose::ExtractClaims, serde_json::to_string(&claims).unwrap());
        f.llm.set_default(LlmPurpose::VerifyClaim, "SUPPORTED");

        let node = ParallelBatch::new(verifier(&f), WorkerPool::new(4));
        let action = run_node(&node, &mut f.ctx).await.unwrap();
        assert_eq!(action, Action::Ok);
        assert_eq!(f.ctx.claim_verification.as_ref().unwrap().supported, claims);
        // Every claim searched for evidence with the configured limit.
        let searches = f.corpus.searches();
        assert_eq!(searches.len(), 10);
        assert!(searches.iter().all(|s| s.limit == 3));
    }
}

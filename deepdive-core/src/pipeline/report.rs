//! FinalReport and End.
//!
//! FinalReport drafts the report with the reasoning model, hands the draft to
//! verification, and once verified formats it with the unverified-claims
//! addendum and a statistics footer. Recoverable model failures route to
//! compaction until compaction has nothing left to give, at which point an
//! evidence digest stands in for the report.

use async_trait::async_trait;
use std::fmt::Write as _;
use tracing::{info, warn};

use super::Action;
use super::prompts::report_prompt;
use crate::context::{ResearchContext, ResearchStats};
use crate::engine::Node;
use crate::error::{LlmError, Result};
use crate::services::Services;
use crate::types::{ConversationHit, LlmPurpose, LlmRequest, VerificationSummary};

/// Append the unverified-claims addendum and the statistics footer.
pub fn format_final_report(
    draft: &str,
    verification: Option<&VerificationSummary>,
    stats: &ResearchStats,
) -> String {
    let mut report = draft.trim_end().to_string();

    if let Some(summary) = verification
        && !summary.unsupported.is_empty()
    {
        report.push_str("\n\n## Unverified claims\n\n");
        report.push_str(
            "The following claims could not be confirmed against the retrieved conversations:\n\n",
        );
        for claim in &summary.unsupported {
            let _ = writeln!(report, "- {claim}");
        }
    }

    report.push_str("\n\n---\n\n## Research statistics\n\n");
    let _ = writeln!(report, "- Run: {}", stats.run_id);
    let _ = writeln!(
        report,
        "- Iterations: {} (max {})",
        stats.iterations, stats.max_depth
    );
    let _ = writeln!(report, "- Conversations retained: {}", stats.hits);
    let _ = writeln!(report, "- Search queries: {}", stats.queries);
    let _ = writeln!(
        report,
        "- Claims checked: {} ({} unverified)",
        stats.claims_checked, stats.claims_unsupported
    );
    let _ = writeln!(report, "- Verification retries: {}", stats.verification_attempts);
    let _ = writeln!(report, "- Compaction attempts: {}", stats.compaction_attempts);
    report
}

/// Report body used when the model cannot produce a report at all.
pub fn evidence_digest(request: &str, hits: &[ConversationHit], error: Option<&str>) -> String {
    let mut out = format!("# Research notes: {request}\n\n");
    let _ = writeln!(
        out,
        "> A full report could not be generated ({}). The evidence gathered is listed \
         below without synthesis.",
        error.unwrap_or("model unavailable")
    );
    out.push('\n');
    if hits.is_empty() {
        out.push_str("No conversations were retrieved.\n");
    }
    for hit in hits {
        let summary = if hit.has_summary() {
            hit.summary.as_str()
        } else {
            "(no summary)"
        };
        let _ = writeln!(out, "- <{}> (score {:.2}): {}", hit.url, hit.score, summary);
    }
    out
}

pub enum ReportWork {
    Draft(LlmRequest),
    Finalize {
        draft: String,
        verification: Option<VerificationSummary>,
        stats: ResearchStats,
    },
}

pub enum ReportResult {
    Draft(std::result::Result<String, LlmError>),
    Final(String),
}

pub struct FinalReport {
    services: Services,
}

impl FinalReport {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Node<ResearchContext, Action> for FinalReport {
    type Prep = ReportWork;
    type Exec = ReportResult;

    fn name(&self) -> &'static str {
        "final_report"
    }

    async fn prep(&self, ctx: &ResearchContext) -> Result<ReportWork> {
        if ctx.draft_verified
            && let Some(draft) = &ctx.draft_answer
        {
            return Ok(ReportWork::Finalize {
                draft: draft.clone(),
                verification: ctx.claim_verification.clone(),
                stats: ctx.stats(),
            });
        }
        Ok(ReportWork::Draft(LlmRequest::new(
            LlmPurpose::Report,
            &ctx.models.reasoning,
            report_prompt(&ctx.request, &ctx.clarifications, ctx.memory.hits()),
        )))
    }

    async fn exec(&self, work: ReportWork) -> Result<ReportResult> {
        match work {
            ReportWork::Draft(request) => {
                Ok(ReportResult::Draft(self.services.llm.invoke(request).await))
            }
            ReportWork::Finalize {
                draft,
                verification,
                stats,
            } => Ok(ReportResult::Final(format_final_report(
                &draft,
                verification.as_ref(),
                &stats,
            ))),
        }
    }

    async fn post(&self, ctx: &mut ResearchContext, result: ReportResult) -> Result<Action> {
        match result {
            ReportResult::Final(report) => {
                info!(node = "final_report", chars = report.len(), "Report complete");
                ctx.final_report = Some(report);
                Ok(Action::Complete)
            }
            ReportResult::Draft(Ok(draft)) => {
                info!(
                    node = "final_report",
                    hits = ctx.memory.len(),
                    chars = draft.len(),
                    "Draft written; verifying"
                );
                ctx.draft_answer = Some(draft);
                ctx.draft_verified = false;
                Ok(Action::Verify)
            }
            ReportResult::Draft(Err(e)) if e.is_recoverable() => {
                let message = e.to_string();
                if ctx.compaction_exhausted() {
                    warn!(
                        node = "final_report",
                        error = %message,
                        compaction_attempts = ctx.compaction_attempts.used(),
                        "Compaction exhausted; falling back to evidence digest"
                    );
                    ctx.last_context_error = Some(message);
                    let digest = evidence_digest(
                        &ctx.request,
                        ctx.memory.hits(),
                        ctx.last_context_error.as_deref(),
                    );
                    ctx.draft_answer = Some(digest.clone());
                    ctx.draft_verified = true;
                    let stats = ctx.stats();
                    ctx.final_report = Some(format_final_report(
                        &digest,
                        ctx.claim_verification.as_ref(),
                        &stats,
                    ));
                    return Ok(Action::Complete);
                }
                warn!(
                    node = "final_report",
                    error = %message,
                    hits = ctx.memory.len(),
                    "Report generation hit a context limit; compacting"
                );
                ctx.last_context_error = Some(message);
                Ok(Action::Compact)
            }
            ReportResult::Draft(Err(e)) => Err(e.into()),
        }
    }
}

/// Terminal sink.
pub struct End;

#[async_trait]
impl Node<ResearchContext, Action> for End {
    type Prep = ();
    type Exec = ();

    fn name(&self) -> &'static str {
        "end"
    }

    async fn prep(&self, _ctx: &ResearchContext) -> Result<()> {
        Ok(())
    }

    async fn exec(&self, _: ()) -> Result<()> {
        Ok(())
    }

    async fn post(&self, ctx: &mut ResearchContext, _: ()) -> Result<Action> {
        let stats = ctx.stats();
        info!(
            run_id = %stats.run_id,
            iterations = stats.iterations,
            hits = stats.hits,
            compaction_attempts = stats.compaction_attempts,
            elapsed_secs = stats.elapsed_secs,
            "Research run complete"
        );
        Ok(Action::Done)
    }
}

//! The research state machine.
//!
//! ```text
//! InitialResearch -> AskClarifying -> Planner <-> Retriever (bounded loop)
//! Planner/Retriever --final--> FinalReport --verify--> ClaimVerifier --ok--> FinalReport
//! ClaimVerifier --fix--> Planner (at most once)
//! FinalReport --compact--> ContextCompaction --retry|proceed_anyway--> FinalReport
//! FinalReport --complete--> End
//! ```
//!
//! Each stage is an engine [`Node`](crate::engine::Node) over
//! [`ResearchContext`]; [`route`] is the whole transition table.

pub mod clarify;
pub mod compaction;
pub mod initial;
pub mod planner;
pub mod prompts;
pub mod report;
pub mod retriever;
pub mod verifier;

use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, info, info_span};

use crate::config::ResearchConfig;
use crate::context::{ResearchContext, ResearchStats};
use crate::engine::{Batch, Fanout, Flow, ParallelBatch, Step, WorkerPool};
use crate::error::Result;
use crate::services::{ClarificationSource, Services, SkipClarification};
use crate::types::VerificationSummary;

pub use clarify::AskClarifying;
pub use compaction::ContextCompaction;
pub use initial::InitialResearch;
pub use planner::Planner;
pub use report::{End, FinalReport};
pub use retriever::Retriever;
pub use verifier::ClaimVerifier;

/// Pipeline stages, used as flow node keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    InitialResearch,
    AskClarifying,
    Planner,
    Retriever,
    FinalReport,
    ClaimVerifier,
    ContextCompaction,
    End,
}

/// Routing actions yielded by stage postprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Default,
    Search,
    Continue,
    Final,
    Verify,
    Ok,
    Fix,
    Compact,
    Retry,
    ProceedAnyway,
    Complete,
    Done,
}

/// The transition table. `None` stops the flow.
pub fn route(stage: Stage, action: Action) -> Option<Stage> {
    use Action as A;
    use Stage as S;

    match (stage, action) {
        (S::InitialResearch, A::Default) => Some(S::AskClarifying),
        (S::AskClarifying, A::Default) => Some(S::Planner),
        (S::Planner, A::Search) => Some(S::Retriever),
        (S::Planner, A::Final) => Some(S::FinalReport),
        (S::Retriever, A::Continue) => Some(S::Planner),
        (S::Retriever, A::Final) => Some(S::FinalReport),
        (S::FinalReport, A::Verify) => Some(S::ClaimVerifier),
        (S::FinalReport, A::Compact) => Some(S::ContextCompaction),
        (S::FinalReport, A::Complete) => Some(S::End),
        (S::ClaimVerifier, A::Ok) => Some(S::FinalReport),
        (S::ClaimVerifier, A::Fix) => Some(S::Planner),
        (S::ContextCompaction, A::Retry) => Some(S::FinalReport),
        (S::ContextCompaction, A::ProceedAnyway) => Some(S::FinalReport),
        _ => None,
    }
}

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct ResearchOutcome {
    pub report: String,
    pub stats: ResearchStats,
    pub verification: Option<VerificationSummary>,
    /// Every stage executed, with the action it yielded.
    pub trace: Vec<Step<Stage, Action>>,
}

/// Drives one research run from request to report.
pub struct ResearchPipeline {
    config: ResearchConfig,
    services: Services,
    clarifier: Arc<dyn ClarificationSource>,
}

impl ResearchPipeline {
    /// A pipeline that asks no clarifying questions.
    pub fn new(config: ResearchConfig, services: Services) -> Self {
        Self {
            config,
            services,
            clarifier: Arc::new(SkipClarification),
        }
    }

    pub fn with_clarifier(mut self, clarifier: Arc<dyn ClarificationSource>) -> Self {
        self.clarifier = clarifier;
        self
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    /// Wire every stage into a flow, picking the sequential or parallel
    /// retriever and verifier from configuration.
    pub fn build_flow(&self) -> Flow<ResearchContext, Stage, Action> {
        let cfg = &self.config;
        let fanout = Fanout::from_config(cfg.parallel, cfg.max_workers);

        let flow = Flow::new("research", Stage::InitialResearch, route)
            .with_max_steps(cfg.flow_step_limit())
            .node(Stage::InitialResearch, InitialResearch::new(self.services.clone()))
            .node(
                Stage::AskClarifying,
                AskClarifying::new(
                    self.services.clone(),
                    self.clarifier.clone(),
                    cfg.max_clarifying_questions,
                ),
            )
            .node(
                Stage::Planner,
                Planner::new(self.services.clone(), cfg.search_mode),
            )
            .node(
                Stage::Retriever,
                Retriever::new(self.services.clone(), fanout),
            )
            .node(Stage::FinalReport, FinalReport::new(self.services.clone()))
            .node(
                Stage::ContextCompaction,
                ContextCompaction::new(Duration::from_millis(cfg.compaction_delay_ms)),
            )
            .node(Stage::End, End);

        let verifier = ClaimVerifier::new(self.services.clone(), cfg.evidence_limit, cfg.max_claims);
        if cfg.parallel {
            flow.node(
                Stage::ClaimVerifier,
                ParallelBatch::new(verifier, WorkerPool::new(cfg.max_workers)),
            )
        } else {
            flow.node(Stage::ClaimVerifier, Batch::new(verifier))
        }
    }

    /// Run the flow against an existing context.
    pub async fn run_context(&self, ctx: &mut ResearchContext) -> Result<Vec<Step<Stage, Action>>> {
        let flow = self.build_flow();
        let span = info_span!("research", run_id = %ctx.run_id);
        let (_, trace) = flow.run_traced(ctx).instrument(span).await?;
        Ok(trace)
    }

    /// Run a full research pass for `request`.
    pub async fn run(&self, request: &str) -> Result<ResearchOutcome> {
        self.config.validate()?;
        let mut ctx = ResearchContext::new(request, &self.config);
        info!(
            run_id = %ctx.run_id,
            corpus = %ctx.corpus,
            max_depth = ctx.depth.max(),
            mode = %self.config.search_mode,
            parallel = self.config.parallel,
            "Starting research run"
        );

        let trace = self.run_context(&mut ctx).await?;
        let report = ctx
            .final_report
            .clone()
            .or_else(|| ctx.draft_answer.clone())
            .unwrap_or_default();

        Ok(ResearchOutcome {
            report,
            stats: ctx.stats(),
            verification: ctx.claim_verification.clone(),
            trace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_main_path() {
        assert_eq!(
            route(Stage::InitialResearch, Action::Default),
            Some(Stage::AskClarifying)
        );
        assert_eq!(route(Stage::AskClarifying, Action::Default), Some(Stage::Planner));
        assert_eq!(route(Stage::Planner, Action::Search), Some(Stage::Retriever));
        assert_eq!(route(Stage::Retriever, Action::Continue), Some(Stage::Planner));
        assert_eq!(route(Stage::Retriever, Action::Final), Some(Stage::FinalReport));
        assert_eq!(route(Stage::FinalReport, Action::Verify), Some(Stage::ClaimVerifier));
        assert_eq!(route(Stage::ClaimVerifier, Action::Ok), Some(Stage::FinalReport));
        assert_eq!(route(Stage::FinalReport, Action::Complete), Some(Stage::End));
    }

    #[test]
    fn test_route_recovery_edges() {
        assert_eq!(route(Stage::ClaimVerifier, Action::Fix), Some(Stage::Planner));
        assert_eq!(
            route(Stage::FinalReport, Action::Compact),
            Some(Stage::ContextCompaction)
        );
        assert_eq!(
            route(Stage::ContextCompaction, Action::Retry),
            Some(Stage::FinalReport)
        );
        assert_eq!(
            route(Stage::ContextCompaction, Action::ProceedAnyway),
            Some(Stage::FinalReport)
        );
    }

    #[test]
    fn test_end_has_no_edge() {
        assert_eq!(route(Stage::End, Action::Done), None);
        // Unwired combinations stop the flow rather than looping.
        assert_eq!(route(Stage::Planner, Action::Ok), None);
    }
}

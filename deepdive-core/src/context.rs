//! Shared state for one research run.
//!
//! `ResearchContext` is threaded through every pipeline node by reference.
//! Only the prepare and postprocess phases touch it; workers receive owned
//! copies of whatever they need. The bounded counters and the hit list carry
//! their invariants in their types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::config::ResearchConfig;
use crate::types::{ConversationHit, ModelAliases, SearchPlan, VerificationSummary};

/// A counter that can never exceed `MAX`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempts<const MAX: u8> {
    used: u8,
}

impl<const MAX: u8> Attempts<MAX> {
    pub const LIMIT: u8 = MAX;

    pub fn used(&self) -> u8 {
        self.used
    }

    pub fn remaining(&self) -> u8 {
        MAX - self.used
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= MAX
    }

    /// Consume one attempt. Returns `false` (and leaves the counter alone)
    /// when the budget is already spent.
    pub fn try_increment(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.used += 1;
        true
    }
}

/// Planner/retriever iteration counter, saturating at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Depth {
    current: usize,
    max: usize,
}

impl Depth {
    pub fn new(max: usize) -> Self {
        Self { current: 0, max }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn is_exhausted(&self) -> bool {
        self.current >= self.max
    }

    /// Advance by one iteration; never moves past `max`.
    pub fn advance(&mut self) {
        if self.current < self.max {
            self.current += 1;
        }
    }
}

/// Accumulated research material. Hits are unique by url.
#[derive(Debug, Clone, Default)]
pub struct ResearchMemory {
    hits: Vec<ConversationHit>,
    urls: HashSet<String>,
    pub notes: Vec<String>,
    pub search_queries: Vec<String>,
}

impl ResearchMemory {
    /// Append a hit unless its url is already present.
    pub fn insert_hit(&mut self, hit: ConversationHit) -> bool {
        if self.urls.contains(&hit.url) {
            return false;
        }
        self.urls.insert(hit.url.clone());
        self.hits.push(hit);
        true
    }

    pub fn hits(&self) -> &[ConversationHit] {
        &self.hits
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Drop every hit the predicate rejects, keeping the order of the rest.
    pub fn retain(&mut self, mut keep: impl FnMut(&ConversationHit) -> bool) {
        let urls = &mut self.urls;
        self.hits.retain(|hit| {
            let kept = keep(hit);
            if !kept {
                urls.remove(&hit.url);
            }
            kept
        });
    }

    /// Replace each hit's payload with a reduced form and mark it stripped.
    pub fn strip_payloads(&mut self, strip: impl Fn(&serde_json::Value) -> serde_json::Value) {
        for hit in &mut self.hits {
            hit.conversation = strip(&hit.conversation);
            hit.stripped = true;
        }
    }
}

/// The single mutable state object of a research run.
#[derive(Debug, Clone)]
pub struct ResearchContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub request: String,
    pub clarifications: String,
    pub models: ModelAliases,
    pub corpus: String,
    pub max_results: usize,
    pub depth: Depth,
    pub memory: ResearchMemory,
    pub pending_plans: Vec<SearchPlan>,
    pub unsupported_claims: Vec<String>,
    pub verification_attempts: Attempts<1>,
    pub compaction_attempts: Attempts<3>,
    /// Hit count when compaction first ran, raised if memory later grows
    /// past it. Keep counts are relative to it.
    pub compaction_baseline: Option<usize>,
    pub proceed_anyway: bool,
    pub draft_answer: Option<String>,
    pub draft_verified: bool,
    pub claim_verification: Option<VerificationSummary>,
    pub last_context_error: Option<String>,
    pub final_report: Option<String>,
}

impl ResearchContext {
    pub fn new(request: impl Into<String>, config: &ResearchConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            request: request.into(),
            clarifications: String::new(),
            models: config.models.clone(),
            corpus: config.corpus.clone(),
            max_results: config.max_results,
            depth: Depth::new(config.max_depth),
            memory: ResearchMemory::default(),
            pending_plans: Vec::new(),
            unsupported_claims: Vec::new(),
            verification_attempts: Attempts::default(),
            compaction_attempts: Attempts::default(),
            compaction_baseline: None,
            proceed_anyway: false,
            draft_answer: None,
            draft_verified: false,
            claim_verification: None,
            last_context_error: None,
            final_report: None,
        }
    }

    /// Whether report generation should stop asking for more compaction.
    pub fn compaction_exhausted(&self) -> bool {
        self.proceed_anyway || self.compaction_attempts.is_exhausted()
    }

    pub fn stats(&self) -> ResearchStats {
        let (claims_checked, claims_unsupported) = self
            .claim_verification
            .as_ref()
            .map(|s| (s.total, s.unsupported.len()))
            .unwrap_or((0, 0));
        ResearchStats {
            run_id: self.run_id,
            iterations: self.depth.current(),
            max_depth: self.depth.max(),
            hits: self.memory.len(),
            queries: self.memory.search_queries.len(),
            claims_checked,
            claims_unsupported,
            verification_attempts: self.verification_attempts.used(),
            compaction_attempts: self.compaction_attempts.used(),
            proceeded_anyway: self.proceed_anyway,
            elapsed_secs: (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0,
        }
    }
}

/// Summary figures for a finished (or in-progress) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchStats {
    pub run_id: Uuid,
    pub iterations: usize,
    pub max_depth: usize,
    pub hits: usize,
    pub queries: usize,
    pub claims_checked: usize,
    pub claims_unsupported: usize,
    pub verification_attempts: u8,
    pub compaction_attempts: u8,
    pub proceeded_anyway: bool,
    pub elapsed_secs: f64,
}

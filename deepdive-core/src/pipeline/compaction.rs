//! ContextCompaction: shrinks research memory after a recoverable report failure.
//!
//! Keep counts are relative to a baseline: the hit count at the first
//! compaction, raised whenever later retrieval grows memory past it.
//! Attempt 1 removes 30%, attempt 2 removes 50% and strips payloads,
//! attempt 3 keeps 25%. Below four hits, or with no attempts left, the node
//! signals proceed-anyway instead of pruning.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::Duration;
use tracing::info;

use super::Action;
use crate::context::{Attempts, ResearchContext};
use crate::engine::Node;
use crate::error::Result;
use crate::types::ConversationHit;

/// Fewer hits than this are not worth pruning.
pub const MIN_HITS_FOR_COMPACTION: usize = 4;

/// Bonus for hits that carry a summary.
const SUMMARY_WEIGHT: f64 = 10.0;

/// Scale of the recency bonus. Small enough to only break near-ties in score.
const RECENCY_WEIGHT: f64 = 0.01;

/// Payload fields kept once a hit is stripped.
pub const STRIPPED_FIELDS: &[&str] = &[
    "title",
    "state",
    "url",
    "created_at",
    "updated_at",
    "closed_at",
    "merged_at",
    "comments_count",
    "reviews_count",
];

/// Hits to keep on `attempt` (1-based), relative to `baseline`.
pub fn keep_count(baseline: usize, attempt: u8) -> usize {
    match attempt {
        1 => baseline - (baseline * 3).div_ceil(10),
        2 => baseline - baseline.div_ceil(2),
        _ => baseline.div_ceil(4),
    }
}

/// Priority of the hit at `index` among `total`: summary bonus, score and a
/// small recency bonus that favours earlier discoveries.
pub fn priority(hit: &ConversationHit, index: usize, total: usize) -> f64 {
    let summary = if hit.has_summary() { SUMMARY_WEIGHT } else { 0.0 };
    let recency = if total == 0 {
        0.0
    } else {
        RECENCY_WEIGHT * (total - index) as f64 / total as f64
    };
    summary + hit.score + recency
}

/// Urls of the `keep` highest-priority hits. Ties go to the earlier hit.
pub fn select_survivors(hits: &[ConversationHit], keep: usize) -> HashSet<String> {
    let total = hits.len();
    let mut ranked: Vec<(usize, f64)> = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| (i, priority(hit, i, total)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(keep)
        .map(|(i, _)| hits[i].url.clone())
        .collect()
}

/// Reduce a conversation payload to its core fields. Comment and review
/// counts are derived from the arrays when no count is present.
pub fn strip_payload(payload: &Value) -> Value {
    let Some(object) = payload.as_object() else {
        return payload.clone();
    };
    let mut stripped = Map::new();
    for field in STRIPPED_FIELDS {
        if let Some(value) = object.get(*field) {
            stripped.insert((*field).to_string(), value.clone());
        }
    }
    for (count_field, array_field) in [("comments_count", "comments"), ("reviews_count", "reviews")] {
        if !stripped.contains_key(count_field)
            && let Some(items) = object.get(array_field).and_then(Value::as_array)
        {
            stripped.insert(count_field.to_string(), Value::from(items.len()));
        }
    }
    Value::Object(stripped)
}

pub enum CompactionWork {
    ProceedAnyway { reason: &'static str },
    Prune {
        attempt: u8,
        baseline: usize,
        hits: Vec<ConversationHit>,
    },
}

pub enum CompactionPlan {
    ProceedAnyway,
    Prune {
        baseline: usize,
        survivors: HashSet<String>,
        strip: bool,
    },
}

pub struct ContextCompaction {
    delay: Duration,
}

impl ContextCompaction {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Node<ResearchContext, Action> for ContextCompaction {
    type Prep = CompactionWork;
    type Exec = CompactionPlan;

    fn name(&self) -> &'static str {
        "context_compaction"
    }

    async fn prep(&self, ctx: &ResearchContext) -> Result<CompactionWork> {
        if ctx.compaction_attempts.is_exhausted() {
            return Ok(CompactionWork::ProceedAnyway {
                reason: "attempts exhausted",
            });
        }
        if ctx.memory.len() < MIN_HITS_FOR_COMPACTION {
            return Ok(CompactionWork::ProceedAnyway {
                reason: "too few hits to prune",
            });
        }
        Ok(CompactionWork::Prune {
            attempt: ctx.compaction_attempts.used() + 1,
            baseline: ctx
                .compaction_baseline
                .map_or(ctx.memory.len(), |b| b.max(ctx.memory.len())),
            hits: ctx.memory.hits().to_vec(),
        })
    }

    async fn exec(&self, work: CompactionWork) -> Result<CompactionPlan> {
        let (attempt, baseline, hits) = match work {
            CompactionWork::ProceedAnyway { reason } => {
                info!(node = "context_compaction", reason, "Proceeding without compaction");
                return Ok(CompactionPlan::ProceedAnyway);
            }
            CompactionWork::Prune {
                attempt,
                baseline,
                hits,
            } => (attempt, baseline, hits),
        };

        let keep = keep_count(baseline, attempt).min(hits.len());
        let survivors = select_survivors(&hits, keep);
        info!(
            node = "context_compaction",
            attempt,
            max_attempts = Attempts::<3>::LIMIT,
            baseline,
            before = hits.len(),
            after = survivors.len(),
            "Compacting research memory"
        );

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        Ok(CompactionPlan::Prune {
            baseline,
            survivors,
            strip: attempt >= 2,
        })
    }

    async fn post(&self, ctx: &mut ResearchContext, plan: CompactionPlan) -> Result<Action> {
        match plan {
            CompactionPlan::ProceedAnyway => {
                ctx.proceed_anyway = true;
                Ok(Action::ProceedAnyway)
            }
            CompactionPlan::Prune {
                baseline,
                survivors,
                strip,
            } => {
                if !ctx.compaction_attempts.try_increment() {
                    ctx.proceed_anyway = true;
                    return Ok(Action::ProceedAnyway);
                }
                ctx.compaction_baseline = Some(baseline);
                ctx.memory.retain(|hit| survivors.contains(&hit.url));
                if strip {
                    ctx.memory.strip_payloads(strip_payload);
                }
                Ok(Action::Retry)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResearchConfig;
    use crate::engine::run_node;
    use crate::types::SearchMode;
    use serde_json::json;

    fn context_with_hits(n: usize) -> ResearchContext {
        let mut ctx = ResearchContext::new("q", &ResearchConfig::default());
        for i in 0..n {
            ctx.memory.insert_hit(
                ConversationHit::new(format!("u{i}"), SearchMode::Semantic)
                    .with_summary(format!("s{i}"))
                    .with_score(0.5)
                    .with_conversation(json!({
                        "title": format!("T{i}"),
                        "state": "closed",
                        "body": "long body",
                        "comments": [1, 2, 3],
                    })),
            );
        }
        ctx
    }

    fn node() -> ContextCompaction {
        ContextCompaction::new(Duration::ZERO)
    }

    #[test]
    fn test_keep_counts() {
        assert_eq!(keep_count(10, 1), 7);
        assert_eq!(keep_count(100, 1), 70);
        assert_eq!(keep_count(100, 2), 50);
        assert_eq!(keep_count(100, 3), 25);
        assert_eq!(keep_count(7, 1), 4);
        assert_eq!(keep_count(7, 2), 3);
        assert_eq!(keep_count(7, 3), 2);
    }

    #[test]
    fn test_survivors_prefer_summary_then_score_then_earlier() {
        let hits = vec![
            ConversationHit::new("no-summary", SearchMode::Keyword).with_score(0.99),
            ConversationHit::new("low", SearchMode::Semantic)
                .with_summary("s")
                .with_score(0.1),
            ConversationHit::new("high", SearchMode::Semantic)
                .with_summary("s")
                .with_score(0.9),
            ConversationHit::new("high-late", SearchMode::Semantic)
                .with_summary("s")
                .with_score(0.9),
        ];
        let survivors = select_survivors(&hits, 2);
        assert!(survivors.contains("high"));
        assert!(survivors.contains("high-late"));

        let survivors = select_survivors(&hits, 3);
        assert!(survivors.contains("low"));
        assert!(!survivors.contains("no-summary"));
    }

    #[test]
    fn test_strip_payload_keeps_core_fields() {
        let stripped = strip_payload(&json!({
            "title": "T",
            "state": "open",
            "url": "u",
            "body": "gone",
            "comments": [{}, {}],
            "reviews_count": 4,
        }));
        assert_eq!(
            stripped,
            json!({"title": "T", "state": "open", "url": "u", "comments_count": 2, "reviews_count": 4})
        );
        assert_eq!(strip_payload(&json!("text")), json!("text"));
    }

    #[tokio::test]
    async fn test_first_attempt_removes_thirty_percent() {
        let mut ctx = context_with_hits(10);
        let action = run_node(&node(), &mut ctx).await.unwrap();
        assert_eq!(action, Action::Retry);
        assert_eq!(ctx.compaction_attempts.used(), 1);
        assert_eq!(ctx.compaction_baseline, Some(10));
        assert_eq!(ctx.memory.len(), 7);
        assert!(ctx.memory.hits().iter().all(|h| !h.stripped));
        // Equal scores: the recency bonus keeps the earliest discoveries, in order.
        let urls: Vec<_> = ctx.memory.hits().iter().map(|h| h.url.as_str()).collect();
        assert_eq!(urls, vec!["u0", "u1", "u2", "u3", "u4", "u5", "u6"]);
    }

    #[tokio::test]
    async fn test_three_attempts_leave_a_quarter() {
        let mut ctx = context_with_hits(100);
        for expected in [70, 50, 25] {
            assert_eq!(run_node(&node(), &mut ctx).await.unwrap(), Action::Retry);
            assert_eq!(ctx.memory.len(), expected);
        }
        assert!(ctx.memory.hits().iter().all(|h| h.stripped));
        assert_eq!(
            ctx.memory.hits()[0].conversation,
            json!({"title": "T0", "state": "closed", "comments_count": 3})
        );

        assert_eq!(
            run_node(&node(), &mut ctx).await.unwrap(),
            Action::ProceedAnyway
        );
        assert!(ctx.proceed_anyway);
        assert_eq!(ctx.compaction_attempts.used(), 3);
        assert_eq!(ctx.memory.len(), 25);
    }

    #[test]
    fn test_score_outranks_discovery_order() {
        let hits = vec![
            ConversationHit::new("early-weak", SearchMode::Semantic)
                .with_summary("s")
                .with_score(0.30),
            ConversationHit::new("late-strong", SearchMode::Semantic)
                .with_summary("s")
                .with_score(0.35),
        ];
        let survivors = select_survivors(&hits, 1);
        assert!(survivors.contains("late-strong"));
        assert!(priority(&hits[1], 1, 2) > priority(&hits[0], 0, 2));
    }

    #[tokio::test]
    async fn test_baseline_follows_growth_after_compaction() {
        let mut ctx = context_with_hits(27);
        ctx.compaction_baseline = Some(10);
        assert!(ctx.compaction_attempts.try_increment());

        let action = run_node(&node(), &mut ctx).await.unwrap();
        assert_eq!(action, Action::Retry);
        // Second attempt drops half of the grown memory, not of the old baseline.
        assert_eq!(ctx.memory.len(), 13);
        assert_eq!(ctx.compaction_baseline, Some(27));
        assert_eq!(ctx.compaction_attempts.used(), 2);
    }

    #[tokio::test]
    async fn test_shrunken_memory_keeps_original_baseline() {
        let mut ctx = context_with_hits(8);
        ctx.compaction_baseline = Some(10);
        assert!(ctx.compaction_attempts.try_increment());

        run_node(&node(), &mut ctx).await.unwrap();
        assert_eq!(ctx.memory.len(), 5);
        assert_eq!(ctx.compaction_baseline, Some(10));
    }

    #[tokio::test]
    async fn test_floor_proceeds_without_pruning() {
        let mut ctx = context_with_hits(3);
        assert_eq!(
            run_node(&node(), &mut ctx).await.unwrap(),
            Action::ProceedAnyway
        );
        assert!(ctx.proceed_anyway);
        assert_eq!(ctx.compaction_attempts.used(), 0);
        assert_eq!(ctx.memory.len(), 3);
    }
}

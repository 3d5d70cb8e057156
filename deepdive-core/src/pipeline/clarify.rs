//! AskClarifying: asks the user a few scoping questions before planning.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use super::Action;
use super::prompts::{DIGEST_HITS, clarify_prompt, findings_digest};
use crate::context::ResearchContext;
use crate::engine::Node;
use crate::error::Result;
use crate::services::{ClarificationSource, Services};
use crate::types::{LlmPurpose, LlmRequest};

/// Remove a leading `1.`, `2)`, `-`, `*` or `•` list marker. A marker must be
/// followed by whitespace, so "2FA enabled?" and "3.5 only?" stay intact.
fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let numbered = line.trim_start_matches(|c: char| c.is_ascii_digit());
    let rest = if numbered.len() < line.len() {
        numbered.strip_prefix(['.', ')'])
    } else {
        line.strip_prefix(['-', '*', '•'])
    };
    match rest {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest.trim(),
        _ => line,
    }
}

/// Pull questions out of a model reply: one per non-empty line, with list
/// markers removed, capped at `max`.
pub fn parse_questions(reply: &str, max: usize) -> Vec<String> {
    reply
        .lines()
        .map(strip_list_marker)
        .filter(|line| !line.is_empty())
        .take(max)
        .map(str::to_string)
        .collect()
}

/// Render questions and answers as the clarification text kept in context.
pub fn format_clarifications(questions: &[String], answers: &str) -> String {
    let mut out = String::new();
    for (i, q) in questions.iter().enumerate() {
        out.push_str(&format!("Q{}: {}\n", i + 1, q));
    }
    out.push_str("\nAnswers:\n");
    out.push_str(answers.trim());
    out
}

pub struct AskClarifying {
    services: Services,
    source: Arc<dyn ClarificationSource>,
    max_questions: usize,
}

impl AskClarifying {
    pub fn new(
        services: Services,
        source: Arc<dyn ClarificationSource>,
        max_questions: usize,
    ) -> Self {
        Self {
            services,
            source,
            max_questions,
        }
    }
}

#[async_trait]
impl Node<ResearchContext, Action> for AskClarifying {
    /// `None` when the source does not take questions.
    type Prep = Option<LlmRequest>;
    type Exec = String;

    fn name(&self) -> &'static str {
        "ask_clarifying"
    }

    async fn prep(&self, ctx: &ResearchContext) -> Result<Option<LlmRequest>> {
        if !self.source.wants_questions() || self.max_questions == 0 {
            return Ok(None);
        }
        let digest = findings_digest(ctx.memory.hits(), DIGEST_HITS);
        Ok(Some(LlmRequest::new(
            LlmPurpose::Clarify,
            &ctx.models.fast,
            clarify_prompt(&ctx.request, &digest, self.max_questions),
        )))
    }

    async fn exec(&self, request: Option<LlmRequest>) -> Result<String> {
        let Some(request) = request else {
            return Ok(String::new());
        };

        let questions = match self.services.llm.invoke(request).await {
            Ok(reply) => parse_questions(&reply, self.max_questions),
            Err(e) => {
                warn!(error = %e, "Clarifying questions unavailable; continuing without");
                return Ok(String::new());
            }
        };
        if questions.is_empty() {
            return Ok(String::new());
        }

        let answers = self.source.answer(&questions).await?;
        if answers.trim().is_empty() {
            return Ok(String::new());
        }
        Ok(format_clarifications(&questions, &answers))
    }

    async fn post(&self, ctx: &mut ResearchContext, clarifications: String) -> Result<Action> {
        info!(
            node = "ask_clarifying",
            clarified = !clarifications.is_empty(),
            "Clarification step complete"
        );
        ctx.clarifications = clarifications;
        Ok(Action::Default)
    }
}

//! Prompt templates and helpers for reading model output.

use std::fmt::Write as _;

use crate::types::ConversationHit;

/// Hits shown in the clarification digest.
pub const DIGEST_HITS: usize = 10;

/// Characters of conversation content handed to the summarizer.
pub const SUMMARY_INPUT_CHARS: usize = 12_000;

/// Remove a surrounding Markdown code fence (with optional language tag)
/// and trim whitespace.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string on the opening fence line.
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Take at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// `url: summary` lines for the first hits, used to ground clarifying questions.
pub fn findings_digest(hits: &[ConversationHit], limit: usize) -> String {
    let mut digest = String::new();
    for hit in hits.iter().take(limit) {
        let summary = if hit.has_summary() {
            hit.summary.as_str()
        } else {
            "(no summary)"
        };
        let _ = writeln!(digest, "- {}: {}", hit.url, summary);
    }
    if digest.is_empty() {
        digest.push_str("(no findings yet)\n");
    }
    digest
}

pub fn clarify_prompt(request: &str, digest: &str, max_questions: usize) -> String {
    format!(
        "You are helping scope a research task over a corpus of issues, pull requests and \
         discussions.\n\n\
         Research request:\n{request}\n\n\
         Initial findings:\n{digest}\n\
         Ask at most {max_questions} short clarifying questions that would most change where \
         the research looks. One question per line, no preamble."
    )
}

fn research_state(
    request: &str,
    clarifications: &str,
    notes: &[String],
    previous_queries: &[String],
) -> String {
    let mut out = format!("Research request:\n{request}\n");
    if !clarifications.trim().is_empty() {
        let _ = write!(out, "\nClarifications:\n{clarifications}\n");
    }
    if !notes.is_empty() {
        out.push_str("\nProgress notes:\n");
        for note in notes {
            let _ = writeln!(out, "- {note}");
        }
    }
    if !previous_queries.is_empty() {
        out.push_str("\nQueries already run (do not repeat them):\n");
        for q in previous_queries {
            let _ = writeln!(out, "- {q}");
        }
    }
    out
}

pub fn semantic_plan_prompt(
    request: &str,
    clarifications: &str,
    notes: &[String],
    previous_queries: &[String],
) -> String {
    format!(
        "{}\n\
         Write the next semantic search query. Reply with JSON only:\n\
         {{\"query\": \"...\", \"created_after\": \"YYYY-MM-DD\" (optional), \
         \"created_before\": \"YYYY-MM-DD\" (optional), \"order_by\": \"created|updated\" \
         (optional)}}",
        research_state(request, clarifications, notes, previous_queries)
    )
}

pub fn keyword_plan_prompt(
    request: &str,
    clarifications: &str,
    notes: &[String],
    previous_queries: &[String],
) -> String {
    format!(
        "{}\n\
         Write the next keyword search query using search operator syntax (quoted phrases, \
         OR, -exclusions, label:, is:). Use at most 5 terms. Reply with the query only.",
        research_state(request, clarifications, notes, previous_queries)
    )
}

pub fn claims_plan_prompt(request: &str, claims: &[String], keyword: bool) -> String {
    let mut listed = String::new();
    for claim in claims {
        let _ = writeln!(listed, "- {claim}");
    }
    let shape = if keyword {
        "Reply with a keyword query (operator syntax, at most 5 terms) and nothing else."
    } else {
        "Reply with JSON only: {\"query\": \"...\"}"
    };
    format!(
        "Research request:\n{request}\n\n\
         A draft report made these claims that the evidence gathered so far does not \
         support:\n{listed}\n\
         Write one search query that would find conversations confirming or refuting them. \
         {shape}"
    )
}

pub fn summarize_prompt(url: &str, content: &str) -> String {
    format!(
        "Summarize this conversation in 2-3 sentences, focusing on the problem discussed and \
         how it was resolved.\n\nURL: {url}\n\n{content}"
    )
}

pub fn report_prompt(request: &str, clarifications: &str, hits: &[ConversationHit]) -> String {
    let mut out = format!(
        "Write a research report answering the request below. Cite conversations by URL. \
         Only state what the evidence supports.\n\nResearch request:\n{request}\n"
    );
    if !clarifications.trim().is_empty() {
        let _ = write!(out, "\nClarifications:\n{clarifications}\n");
    }
    let _ = write!(out, "\nEvidence ({} conversations):\n", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        let payload =
            serde_json::to_string(&hit.conversation).unwrap_or_else(|_| "null".to_string());
        let _ = write!(
            out,
            "\n[{}] {}\nscore: {:.3}\nsummary: {}\nconversation: {}\n",
            i + 1,
            hit.url,
            hit.score,
            hit.summary,
            payload
        );
    }
    out
}

pub fn extract_claims_prompt(draft: &str, max_claims: usize) -> String {
    format!(
        "List up to {max_claims} specific, falsifiable factual claims made in the report \
         below. Reply with a JSON array of strings only.\n\nReport:\n{draft}"
    )
}

pub fn verify_claim_prompt(claim: &str, evidence: &str) -> String {
    format!(
        "Claim:\n{claim}\n\nEvidence:\n{evidence}\n\n\
         Does the evidence support the claim? Answer with exactly one word: SUPPORTED or \
         UNSUPPORTED."
    )
}

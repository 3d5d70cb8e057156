//! Property-based tests for research state invariants using proptest.

use std::collections::HashSet;

use proptest::prelude::*;

use deepdive_core::context::{Attempts, Depth, ResearchMemory};
use deepdive_core::pipeline::compaction::{keep_count, select_survivors};
use deepdive_core::pipeline::planner::{keyword_terms, truncate_keyword_terms};
use deepdive_core::pipeline::prompts::truncate_chars;
use deepdive_core::pipeline::retriever::merge_results;
use deepdive_core::pipeline::verifier::parse_claims;
use deepdive_core::types::{ConversationHit, SearchMode, SearchResult};

fn hits(scores: &[f64], with_summary: &[bool]) -> Vec<ConversationHit> {
    scores
        .iter()
        .zip(with_summary)
        .enumerate()
        .map(|(i, (score, summary))| {
            let hit = ConversationHit::new(format!("u{i}"), SearchMode::Semantic).with_score(*score);
            if *summary {
                hit.with_summary(format!("summary {i}"))
            } else {
                hit
            }
        })
        .collect()
}

// --- Research memory properties ---

proptest! {
    #[test]
    fn memory_never_holds_duplicate_urls(urls in prop::collection::vec(0u8..20, 0..60)) {
        let mut memory = ResearchMemory::default();
        for u in &urls {
            memory.insert_hit(ConversationHit::new(format!("u{u}"), SearchMode::Keyword));
        }
        let distinct: HashSet<_> = urls.iter().collect();
        prop_assert_eq!(memory.len(), distinct.len());

        let seen: HashSet<_> = memory.hits().iter().map(|h| h.url.clone()).collect();
        prop_assert_eq!(seen.len(), memory.len());
    }

    #[test]
    fn memory_keeps_first_seen_order(urls in prop::collection::vec(0u8..10, 1..30)) {
        let mut memory = ResearchMemory::default();
        let mut expected: Vec<String> = Vec::new();
        for u in &urls {
            let url = format!("u{u}");
            if !expected.contains(&url) {
                expected.push(url.clone());
            }
            memory.insert_hit(ConversationHit::new(url, SearchMode::Semantic));
        }
        let order: Vec<_> = memory.hits().iter().map(|h| h.url.clone()).collect();
        prop_assert_eq!(order, expected);
    }
}

// --- Counter properties ---

proptest! {
    #[test]
    fn depth_saturates_at_max(max in 0usize..10, advances in 0usize..30) {
        let mut depth = Depth::new(max);
        for _ in 0..advances {
            depth.advance();
        }
        prop_assert!(depth.current() <= max);
        prop_assert_eq!(depth.current(), advances.min(max));
        prop_assert_eq!(depth.is_exhausted(), advances >= max);
    }

    #[test]
    fn attempts_never_exceed_limit(tries in 0usize..20) {
        let mut verification = Attempts::<1>::default();
        let mut compaction = Attempts::<3>::default();
        let mut granted = 0;
        for _ in 0..tries {
            verification.try_increment();
            if compaction.try_increment() {
                granted += 1;
            }
        }
        prop_assert!(verification.used() <= 1);
        prop_assert!(compaction.used() <= 3);
        prop_assert_eq!(granted, tries.min(3));
        prop_assert_eq!(compaction.remaining(), 3 - compaction.used());
    }
}

// --- Compaction properties ---

proptest! {
    #[test]
    fn keep_count_shrinks_each_attempt(baseline in 4usize..1000) {
        let first = keep_count(baseline, 1);
        let second = keep_count(baseline, 2);
        let third = keep_count(baseline, 3);
        prop_assert!(first < baseline);
        prop_assert!(second <= first);
        prop_assert!(third <= second);
        prop_assert!(third >= 1);
    }

    #[test]
    fn survivors_are_bounded_and_unique(
        scores in prop::collection::vec(0.0f64..1.0, 1..80),
        summary_mask in prop::collection::vec(any::<bool>(), 80),
        keep in 0usize..100,
    ) {
        let hits = hits(&scores, &summary_mask[..scores.len()]);
        let survivors = select_survivors(&hits, keep);
        prop_assert_eq!(survivors.len(), keep.min(hits.len()));
        for url in &survivors {
            prop_assert!(hits.iter().any(|h| &h.url == url));
        }
    }

    #[test]
    fn summarized_hits_outrank_bare_ones(
        scores in prop::collection::vec(0.0f64..1.0, 2..40),
        summary_mask in prop::collection::vec(any::<bool>(), 40),
    ) {
        let mask = &summary_mask[..scores.len()];
        let hits = hits(&scores, mask);
        let with_summary = mask.iter().filter(|m| **m).count();
        let survivors = select_survivors(&hits, with_summary);
        for hit in hits.iter().filter(|h| h.has_summary()) {
            prop_assert!(survivors.contains(&hit.url));
        }
    }
}

// --- Planning and parsing properties ---

proptest! {
    #[test]
    fn keyword_queries_capped_at_five_terms(
        words in prop::collection::vec("[a-z]{1,8}", 0..15),
        phrase in "[a-z]{1,6} [a-z]{1,6}",
    ) {
        let mut query = format!("\"{phrase}\"");
        for w in &words {
            query.push(' ');
            query.push_str(w);
        }
        let truncated = truncate_keyword_terms(&query, 5);
        let terms = keyword_terms(&truncated);
        prop_assert!(terms.len() <= 5);
        prop_assert_eq!(terms.len(), (words.len() + 1).min(5));
        let expected_phrase = format!("\"{}\"", phrase);
        prop_assert_eq!(terms[0].as_str(), expected_phrase.as_str());
    }

    #[test]
    fn parsed_claims_respect_cap(
        claims in prop::collection::vec("[a-zA-Z ]{1,30}", 0..40),
        max in 1usize..40,
    ) {
        let reply = serde_json::to_string(&claims).unwrap();
        let parsed = parse_claims(&reply, max);
        prop_assert!(parsed.len() <= max.min(25));
    }

    #[test]
    fn merged_candidates_are_unique(
        semantic in prop::collection::vec((0u8..15, 0.0f64..1.0), 0..20),
        keyword in prop::collection::vec(0u8..15, 0..20),
    ) {
        let semantic: Vec<SearchResult> = semantic
            .into_iter()
            .map(|(u, score)| SearchResult { url: format!("u{u}"), score, summary: "s".into() })
            .collect();
        let keyword: Vec<SearchResult> = keyword
            .into_iter()
            .map(|u| SearchResult { url: format!("u{u}"), score: 0.0, summary: String::new() })
            .collect();
        let merged = merge_results(vec![
            (SearchMode::Semantic, semantic),
            (SearchMode::Keyword, keyword),
        ]);
        let urls: HashSet<_> = merged.iter().map(|c| c.url.clone()).collect();
        prop_assert_eq!(urls.len(), merged.len());
    }

    #[test]
    fn truncate_chars_never_splits_a_char(text in "\\PC{0,50}", max in 0usize..60) {
        let out = truncate_chars(&text, max);
        prop_assert!(text.starts_with(out));
        prop_assert_eq!(out.chars().count(), text.chars().count().min(max));
    }
}

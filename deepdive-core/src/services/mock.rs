//! In-process test doubles for the collaborator traits.
//!
//! `MockLlmInvoker` answers per [`LlmPurpose`] from queued responses with a
//! per-purpose fallback, and records every call. `MockCorpus` implements both
//! the search provider and the conversation fetcher over an in-memory set of
//! documents.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use super::{ConversationFetcher, LlmInvoker, SearchProvider};
use crate::error::{FetchError, LlmError, SearchError};
use crate::types::{FetchRequest, LlmPurpose, LlmRequest, SearchMode, SearchRequest, SearchResult};

#[derive(Default)]
struct PurposeRule {
    /// `(needle, reply)`: answer with `reply` when the prompt contains `needle`.
    matchers: Vec<(String, String)>,
    queued: VecDeque<Result<String, LlmError>>,
    fallback: Option<String>,
}

/// Scripted language model.
#[derive(Default)]
pub struct MockLlmInvoker {
    rules: Mutex<HashMap<LlmPurpose, PurposeRule>>,
    calls: Mutex<Vec<LlmRequest>>,
}

impl MockLlmInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next call with the given purpose.
    pub fn queue_response(&self, purpose: LlmPurpose, text: impl Into<String>) {
        self.rules
            .lock()
            .unwrap()
            .entry(purpose)
            .or_default()
            .queued
            .push_back(Ok(text.into()));
    }

    /// Queue a failure for the next call with the given purpose.
    pub fn queue_error(&self, purpose: LlmPurpose, error: LlmError) {
        self.rules
            .lock()
            .unwrap()
            .entry(purpose)
            .or_default()
            .queued
            .push_back(Err(error));
    }

    /// Always answer prompts containing `needle` with `text`. Matchers win
    /// over queued replies, which keeps concurrent callers deterministic.
    pub fn reply_when(&self, purpose: LlmPurpose, needle: impl Into<String>, text: impl Into<String>) {
        self.rules
            .lock()
            .unwrap()
            .entry(purpose)
            .or_default()
            .matchers
            .push((needle.into(), text.into()));
    }

    /// Reply used once the queue for `purpose` is empty.
    pub fn set_default(&self, purpose: LlmPurpose, text: impl Into<String>) {
        self.rules.lock().unwrap().entry(purpose).or_default().fallback = Some(text.into());
    }

    pub fn calls(&self) -> Vec<LlmRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, purpose: LlmPurpose) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.purpose == purpose)
            .count()
    }
}

#[async_trait]
impl LlmInvoker for MockLlmInvoker {
    async fn invoke(&self, request: LlmRequest) -> Result<String, LlmError> {
        let purpose = request.purpose;
        let mut rules = self.rules.lock().unwrap();
        let rule = rules.entry(purpose).or_default();
        let matched = rule
            .matchers
            .iter()
            .find(|(needle, _)| request.prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone());
        self.calls.lock().unwrap().push(request);

        if let Some(reply) = matched {
            return Ok(reply);
        }
        if let Some(next) = rule.queued.pop_front() {
            return next;
        }
        match &rule.fallback {
            Some(text) => Ok(text.clone()),
            None => Err(LlmError::ApiRequest {
                message: format!("no scripted response for {purpose}"),
            }),
        }
    }
}

/// One document in the mock corpus.
#[derive(Debug, Clone)]
pub struct MockDocument {
    pub url: String,
    pub summary: String,
    pub score: f64,
    pub conversation: serde_json::Value,
}

#[derive(Default)]
struct CorpusState {
    documents: Vec<MockDocument>,
    scripted: VecDeque<Result<Vec<SearchResult>, SearchError>>,
    failing_urls: HashSet<String>,
    searches: Vec<SearchRequest>,
    fetches: Vec<String>,
}

/// In-memory corpus acting as both search provider and fetcher.
///
/// Unless a scripted result is queued, every search returns the stored
/// documents in insertion order, capped at the request limit. Keyword
/// searches return url-only results with score 0.
#[derive(Default)]
pub struct MockCorpus {
    state: Mutex<CorpusState>,
}

impl MockCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&self, url: impl Into<String>, summary: impl Into<String>, score: f64) {
        let url = url.into();
        let conversation = serde_json::json!({
            "url": url,
            "title": format!("Conversation {url}"),
            "state": "closed",
            "body": "Full discussion body",
            "comments": [],
        });
        self.state.lock().unwrap().documents.push(MockDocument {
            url,
            summary: summary.into(),
            score,
            conversation,
        });
    }

    /// Queue the result of the next search call, overriding the stored documents.
    pub fn queue_search(&self, results: Vec<SearchResult>) {
        self.state.lock().unwrap().scripted.push_back(Ok(results));
    }

    pub fn queue_search_error(&self, error: SearchError) {
        self.state.lock().unwrap().scripted.push_back(Err(error));
    }

    /// Make every fetch of `url` fail.
    pub fn fail_fetch(&self, url: impl Into<String>) {
        self.state.lock().unwrap().failing_urls.insert(url.into());
    }

    pub fn searches(&self) -> Vec<SearchRequest> {
        self.state.lock().unwrap().searches.clone()
    }

    pub fn fetches(&self) -> Vec<String> {
        self.state.lock().unwrap().fetches.clone()
    }
}

#[async_trait]
impl SearchProvider for MockCorpus {
    async fn search(&self, request: SearchRequest) -> Result<Vec<SearchResult>, SearchError> {
        let mut state = self.state.lock().unwrap();
        state.searches.push(request.clone());
        if let Some(scripted) = state.scripted.pop_front() {
            return scripted;
        }
        let results = state
            .documents
            .iter()
            .take(request.limit)
            .map(|doc| match request.mode {
                SearchMode::Semantic => SearchResult {
                    url: doc.url.clone(),
                    score: doc.score,
                    summary: doc.summary.clone(),
                },
                SearchMode::Keyword => SearchResult {
                    url: doc.url.clone(),
                    score: 0.0,
                    summary: String::new(),
                },
            })
            .collect();
        Ok(results)
    }
}

#[async_trait]
impl ConversationFetcher for MockCorpus {
    async fn fetch(&self, request: FetchRequest) -> Result<serde_json::Value, FetchError> {
        let mut state = self.state.lock().unwrap();
        state.fetches.push(request.url.clone());
        if state.failing_urls.contains(&request.url) {
            return Err(FetchError::Request {
                url: request.url,
                message: "scripted failure".into(),
            });
        }
        if let Some(doc) = state.documents.iter().find(|d| d.url == request.url) {
            return Ok(doc.conversation.clone());
        }
        // Unknown urls still resolve so scripted searches can return anything.
        Ok(serde_json::json!({ "url": request.url, "title": "untitled", "state": "open" }))
    }
}

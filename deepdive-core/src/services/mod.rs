//! Collaborator interfaces.
//!
//! The pipeline talks to three external services: a corpus search provider,
//! a conversation fetcher and a language model. Each is an `async_trait`
//! object shared as `Arc<dyn _>` inside the cloneable [`Services`] bundle, so
//! workers can take their own handle without touching shared state.
//!
//! Clarifying answers come from a [`ClarificationSource`], which the CLI
//! backs with an editor and tests back with a file or [`SkipClarification`].

pub mod mock;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{ClarificationError, FetchError, LlmError, SearchError};
use crate::types::{FetchRequest, LlmRequest, SearchRequest, SearchResult};

/// Searches the conversation corpus.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, request: SearchRequest) -> Result<Vec<SearchResult>, SearchError>;
}

/// Fetches the full detail of one conversation as an opaque JSON payload.
#[async_trait]
pub trait ConversationFetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<serde_json::Value, FetchError>;
}

/// Runs one prompt against a named model and returns the text reply.
#[async_trait]
pub trait LlmInvoker: Send + Sync {
    async fn invoke(&self, request: LlmRequest) -> Result<String, LlmError>;
}

/// Handles to every collaborator a run needs.
#[derive(Clone)]
pub struct Services {
    pub search: Arc<dyn SearchProvider>,
    pub fetcher: Arc<dyn ConversationFetcher>,
    pub llm: Arc<dyn LlmInvoker>,
}

impl Services {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        fetcher: Arc<dyn ConversationFetcher>,
        llm: Arc<dyn LlmInvoker>,
    ) -> Self {
        Self {
            search,
            fetcher,
            llm,
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

/// Supplies answers to clarifying questions.
#[async_trait]
pub trait ClarificationSource: Send + Sync {
    /// Whether questions should be generated at all. Sources that never
    /// answer return `false` so no model call is spent on them.
    fn wants_questions(&self) -> bool {
        true
    }

    /// Return free-form answer text for the given questions.
    async fn answer(&self, questions: &[String]) -> Result<String, ClarificationError>;
}

/// Non-interactive source: no questions, no answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipClarification;

#[async_trait]
impl ClarificationSource for SkipClarification {
    fn wants_questions(&self) -> bool {
        false
    }

    async fn answer(&self, _questions: &[String]) -> Result<String, ClarificationError> {
        Ok(String::new())
    }
}

/// Reads prepared answers from a text file.
#[derive(Debug, Clone)]
pub struct AnswerFile {
    path: PathBuf,
}

impl AnswerFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ClarificationSource for AnswerFile {
    async fn answer(&self, _questions: &[String]) -> Result<String, ClarificationError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map(|s| s.trim().to_string())
            .map_err(|_| ClarificationError::AnswerFile {
                path: self.path.clone(),
            })
    }
}

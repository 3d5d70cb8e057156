//! Error types for the deepdive core library.
//!
//! Uses `thiserror` for public API error types with one enum per collaborator
//! (LLM, search, fetch), plus the workflow engine, configuration and
//! clarification domains.

use std::path::PathBuf;

/// Top-level error type for the deepdive core library.
#[derive(Debug, thiserror::Error)]
pub enum DeepdiveError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Clarification error: {0}")]
    Clarification(#[from] ClarificationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from language model invocations.
///
/// `ContextTooLarge` and `RateLimited` are the two recoverable categories:
/// report generation answers them with context compaction. Every other
/// variant is fatal for the step that raised it.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Context too large: {message}")]
    ContextTooLarge { message: String },

    #[error("Rate limited by provider: {message}")]
    RateLimited { message: String },

    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

impl LlmError {
    /// Whether the failure should be answered by shrinking the prompt
    /// rather than aborting the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LlmError::ContextTooLarge { .. } | LlmError::RateLimited { .. }
        )
    }

    /// Classify a free-form error message from a collaborator that cannot
    /// report a structured error code.
    ///
    /// Context-size wording maps to `ContextTooLarge`, throttling wording to
    /// `RateLimited`, anything else to `ApiRequest`.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        const CONTEXT_MARKERS: &[&str] = &[
            "context length",
            "context_length",
            "context window",
            "maximum context",
            "too many tokens",
            "prompt is too long",
            "request too large",
            "input is too long",
            "exceeds the context",
        ];
        const RATE_MARKERS: &[&str] = &[
            "rate limit",
            "rate_limit",
            "ratelimit",
            "too many requests",
            "http 429",
            "status 429",
            "error 429",
            "exceeded your current quota",
            "insufficient_quota",
            "quota exceeded",
        ];

        if CONTEXT_MARKERS.iter().any(|m| lower.contains(m)) {
            LlmError::ContextTooLarge { message }
        } else if RATE_MARKERS.iter().any(|m| lower.contains(m)) {
            LlmError::RateLimited { message }
        } else {
            LlmError::ApiRequest { message }
        }
    }
}

/// Errors from the search provider.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search request failed: {message}")]
    Request { message: String },

    #[error("Search response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Unknown corpus: {corpus}")]
    UnknownCorpus { corpus: String },
}

/// Errors from the conversation fetcher.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Conversation not found: {url}")]
    NotFound { url: String },

    #[error("Fetch of {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("Fetch response parse error for {url}: {message}")]
    ResponseParse { url: String, message: String },
}

/// Errors from the workflow engine.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Flow '{flow}' exceeded {limit} steps without terminating")]
    StepLimitExceeded { flow: String, limit: usize },

    #[error("Flow '{flow}' routes to node {node} which is not registered")]
    MissingNode { flow: String, node: String },

    #[error("Worker failed in '{node}': {message}")]
    WorkerFailed { node: String, message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration serialization error: {message}")]
    Serialize { message: String },
}

/// Errors while collecting answers to clarifying questions.
#[derive(Debug, thiserror::Error)]
pub enum ClarificationError {
    #[error("Answer file not readable: {}", path.display())]
    AnswerFile { path: PathBuf },

    #[error("Interactive editor failed: {message}")]
    Editor { message: String },
}

/// A type alias for results using the top-level `DeepdiveError`.
pub type Result<T> = std::result::Result<T, DeepdiveError>;

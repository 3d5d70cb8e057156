//! Network-backed collaborator implementations.
//!
//! - [`OpenAiCompatibleInvoker`]: chat completions for OpenAI, Azure, Ollama,
//!   vLLM, LM Studio and other compatible endpoints.
//! - [`HttpCorpusClient`]: search and conversation fetch against a corpus service.
//!
//! Use [`create_services`] to build a [`Services`] bundle from configuration.

pub mod corpus_http;
pub mod openai_compat;

use std::sync::Arc;

use crate::config::DeepdiveConfig;
use crate::error::DeepdiveError;
use crate::services::Services;

pub use corpus_http::HttpCorpusClient;
pub use openai_compat::OpenAiCompatibleInvoker;

/// Build the network-backed services described by `config`.
pub fn create_services(config: &DeepdiveConfig) -> Result<Services, DeepdiveError> {
    let llm = Arc::new(OpenAiCompatibleInvoker::new(&config.llm)?);
    let corpus = Arc::new(HttpCorpusClient::new(&config.corpus)?);
    Ok(Services::new(corpus.clone(), corpus, llm))
}

//! HTTP client for a corpus service.
//!
//! Implements both [`SearchProvider`] (`POST {base}/search` with the request
//! as JSON) and [`ConversationFetcher`] (`GET {base}/conversation?url=..`).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::CorpusConfig;
use crate::error::{FetchError, SearchError};
use crate::services::{ConversationFetcher, SearchProvider};
use crate::types::{FetchRequest, SearchRequest, SearchResult};

/// Accepts either a bare array or `{"results": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Bare(Vec<SearchResult>),
    Wrapped { results: Vec<SearchResult> },
}

impl SearchResponse {
    fn into_results(self) -> Vec<SearchResult> {
        match self {
            SearchResponse::Bare(results) | SearchResponse::Wrapped { results } => results,
        }
    }
}

pub struct HttpCorpusClient {
    client: Client,
    base_url: String,
}

impl HttpCorpusClient {
    pub fn new(config: &CorpusConfig) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("deepdive/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SearchError::Request {
                message: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn search_url(&self) -> String {
        format!("{}/search", self.base_url)
    }

    fn conversation_url(&self, request: &FetchRequest) -> String {
        let mut url = format!(
            "{}/conversation?url={}",
            self.base_url,
            urlencoding::encode(&request.url)
        );
        if let Some(cache) = request.cache {
            url.push_str("&cache=");
            url.push_str(cache.as_str());
        }
        url
    }
}

#[async_trait]
impl SearchProvider for HttpCorpusClient {
    async fn search(&self, request: SearchRequest) -> Result<Vec<SearchResult>, SearchError> {
        debug!(
            corpus = %request.corpus,
            mode = %request.mode,
            query = %request.query,
            limit = request.limit,
            "Corpus search"
        );
        let response = self
            .client
            .post(self.search_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| SearchError::Request {
                message: format!("Search request failed: {e}"),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| SearchError::Request {
            message: format!("Failed to read search response: {e}"),
        })?;

        if status == StatusCode::NOT_FOUND {
            return Err(SearchError::UnknownCorpus {
                corpus: request.corpus,
            });
        }
        if !status.is_success() {
            return Err(SearchError::Request {
                message: format!("HTTP {status}: {body}"),
            });
        }

        serde_json::from_str::<SearchResponse>(&body)
            .map(SearchResponse::into_results)
            .map_err(|e| SearchError::ResponseParse {
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl ConversationFetcher for HttpCorpusClient {
    async fn fetch(&self, request: FetchRequest) -> Result<serde_json::Value, FetchError> {
        let url = self.conversation_url(&request);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Request {
                url: request.url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound { url: request.url });
        }
        if !status.is_success() {
            return Err(FetchError::Request {
                url: request.url,
                message: format!("HTTP {status}"),
            });
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| FetchError::ResponseParse {
                url: request.url,
                message: e.to_string(),
            })
    }
}

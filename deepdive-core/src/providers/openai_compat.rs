//! OpenAI-compatible chat completions invoker.
//!
//! Supports OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio, and any
//! endpoint that follows the OpenAI chat completions API format.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::services::LlmInvoker;
use crate::types::LlmRequest;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// [`LlmInvoker`] backed by an OpenAI-compatible HTTP endpoint.
pub struct OpenAiCompatibleInvoker {
    client: Client,
    base_url: String,
    api_key: String,
    temperature: f32,
    timeout_secs: u64,
}

impl OpenAiCompatibleInvoker {
    /// Create a new invoker from configuration.
    ///
    /// Reads the API key from `config.api_key`, then from the environment
    /// variable named by `config.api_key_env`. Local endpoints get a dummy key.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let is_local = config
            .base_url
            .as_ref()
            .map(|u| u.contains("localhost") || u.contains("127.0.0.1"))
            .unwrap_or(false);

        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(&config.api_key_env).ok())
            .or_else(|| {
                if is_local {
                    // Local providers (Ollama, vLLM, LM Studio) don't require an API key
                    debug!("No API key set for local provider; using dummy bearer token");
                    Some("ollama".to_string())
                } else {
                    None
                }
            })
            .ok_or_else(|| LlmError::AuthFailed {
                provider: format!(
                    "OpenAI-compatible: env var '{}' not set",
                    config.api_key_env
                ),
            })?;
        Self::new_with_key(config, api_key)
    }

    /// Create an invoker with an explicitly provided API key.
    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::ApiRequest {
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Reasoning models (o1, o3, o4 families) reject a temperature.
    fn accepts_temperature(model: &str) -> bool {
        !["o1", "o3", "o4"]
            .iter()
            .any(|prefix| model == *prefix || model.starts_with(&format!("{prefix}-")))
    }

    fn request_body(&self, request: &LlmRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "stream": false,
        });
        if Self::accepts_temperature(&request.model) {
            body["temperature"] = json!(self.temperature);
        }
        body
    }

    /// Map an HTTP status code to the appropriate LlmError.
    fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| {
                v.get("error")?
                    .get("message")?
                    .as_str()
                    .map(|s| s.to_string())
            })
            .unwrap_or_else(|| body.to_string());

        match status.as_u16() {
            401 => {
                debug!(body = %body, "Authentication failed (401)");
                LlmError::AuthFailed {
                    provider: "OpenAI-compatible".to_string(),
                }
            }
            429 => LlmError::RateLimited { message },
            // Only a prompt-size complaint is recoverable on a bad request.
            400 | 413 => match LlmError::classify(body) {
                LlmError::ContextTooLarge { .. } => LlmError::ContextTooLarge { message },
                _ => LlmError::ApiRequest {
                    message: format!("HTTP {status}: {message}"),
                },
            },
            s if s >= 500 => LlmError::ApiRequest {
                message: format!("Server error ({status}): {message}"),
            },
            _ => LlmError::classify(format!("HTTP {status}: {message}")),
        }
    }

    fn parse_response(body: &Value) -> Result<String, LlmError> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No choices in response".to_string(),
            })?;

        choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No text content in choice".to_string(),
            })
    }
}

#[async_trait]
impl LlmInvoker for OpenAiCompatibleInvoker {
    async fn invoke(&self, request: LlmRequest) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request);

        debug!(
            url = %url,
            model = %request.model,
            purpose = %request.purpose,
            prompt_chars = request.prompt.len(),
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    LlmError::ApiRequest {
                        message: format!("Request failed: {e}"),
                    }
                }
            })?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| LlmError::ApiRequest {
            message: format!("Failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON: {e}"),
            })?;

        Self::parse_response(&json)
    }
}

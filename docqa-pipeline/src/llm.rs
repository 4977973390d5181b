//! Language model completion client.
//!
//! Speaks the OpenAI-style chat completions protocol over HTTPS. The
//! trait seam exists so the composer and tests can swap in local fakes.

use crate::config::CompletionConfig;
use crate::error::{QaError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// A client able to produce one completion for a prompt.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Complete `prompt` with at most `max_tokens` output tokens.
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// HTTP-backed [`CompletionClient`].
#[derive(Debug)]
pub struct HttpCompletionClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpCompletionClient {
    /// Build a client from configuration.
    ///
    /// When `api_key_env` names an environment variable that is unset,
    /// the client counts as unavailable up front rather than failing on
    /// the first request.
    pub fn create(config: &CompletionConfig) -> Result<Self> {
        let api_key = if config.api_key_env.is_empty() {
            None
        } else {
            match std::env::var(&config.api_key_env) {
                Ok(key) if !key.is_empty() => Some(key),
                _ => {
                    return Err(QaError::model_unavailable(format!(
                        "environment variable {} is not set",
                        config.api_key_env
                    )));
                }
            }
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| QaError::model_unavailable(format!("HTTP client: {e}")))?;

        Ok(HttpCompletionClient {
            http,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
        };

        let mut builder = self.http.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        debug!("Requesting completion from {} ({})", self.endpoint, self.model);
        let response = builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                QaError::model_unavailable(e.to_string())
            } else {
                QaError::completion(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QaError::completion(format!(
                "endpoint returned {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| QaError::completion(format!("malformed response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| QaError::completion("response contained no completion"))
    }
}

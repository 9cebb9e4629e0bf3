//! Completion transport trait and the OpenAI-compatible HTTP transport.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::Message;

/// Error classes for a completion call.
///
/// Only `Connectivity`, `RateLimit` and `Service` are transient; the
/// retry policy decides which of those are retried. `Protocol` covers
/// malformed transport responses and is never retried.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("connection error: {0}")]
    Connectivity(String),
    #[error("rate limited: {0}")]
    RateLimit(String),
    #[error("service error (status {status}): {message}")]
    Service { status: u16, message: String },
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// One successful completion: reply text plus usage metadata.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

/// The network completion primitive wrapped by [`crate::ModelClient`].
///
/// A transport performs exactly one attempt per call; all retry
/// behavior lives above it.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Run one chat completion over the given message sequence.
    async fn complete(&self, messages: &[Message]) -> Result<Completion, ModelError>;
}

/// OpenAI-compatible `POST {base}/chat/completions` transport.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpTransport {
    /// Create a transport for the given provider endpoint and model.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl CompletionTransport for HttpTransport {
    async fn complete(&self, messages: &[Message]) -> Result<Completion, ModelError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let payload = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });

        let mut request = self.client.post(&url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ModelError::Connectivity(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => ModelError::RateLimit(body),
                500..=599 => ModelError::Service {
                    status: status.as_u16(),
                    message: body,
                },
                _ => ModelError::Protocol(format!("unexpected status {status}: {body}")),
            });
        }

        let data: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Protocol(e.to_string()))?;

        let content = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ModelError::Protocol("no choices in response".to_string()))?;

        Ok(Completion {
            content,
            usage: data.usage,
        })
    }
}

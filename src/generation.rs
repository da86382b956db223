//! Answer generation behind a provider trait, plus an OpenAI-compatible chat client.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Groq's OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
/// Default chat model.
pub const DEFAULT_MODEL: &str = "llama-3.1-70b-versatile";

/// Failures talking to the generation provider.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// No API key is configured.
    #[error("generation api key is missing")]
    MissingApiKey,
    /// The API key cannot be sent as a header.
    #[error("generation api key is not a valid header value")]
    InvalidApiKey,
    /// Connection or decoding failure.
    #[error("generation request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Provider answered with an error status.
    #[error("provider returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as far as it could be read.
        body: String,
    },
}

/// One generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    /// Composed grounding prompt.
    pub prompt: &'a str,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion length cap.
    pub max_tokens: usize,
}

impl<'a> GenerationRequest<'a> {
    /// Request with the deployment defaults (temperature 0.2, 600 tokens).
    pub fn new(prompt: &'a str) -> Self {
        Self {
            prompt,
            temperature: 0.2,
            max_tokens: 600,
        }
    }
}

/// Turns a composed prompt into an answer.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Generates an answer for `request`.
    async fn answer(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError>;
}

/// Client for any `/chat/completions` endpoint speaking the OpenAI wire format.
pub struct OpenAiCompatible {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatible {
    /// Builds a client for `base_url` (without the `/chat/completions` suffix).
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self, GenerationError> {
        let api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(GenerationError::MissingApiKey)?;
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: model.into(),
        })
    }

    /// Configured model name.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl AnswerGenerator for OpenAiCompatible {
    async fn answer(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", self.api_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|_| GenerationError::InvalidApiKey)?,
        );
        let body = ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content: request.prompt,
            }],
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .headers(headers)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(GenerationError::Status { status, body });
        }
        if let Some(remaining) = resp.headers().get("x-ratelimit-remaining-requests") {
            tracing::debug!(remaining = ?remaining, "generation rate limit");
        }
        let parsed: ChatResponse = resp.json().await?;
        let answer = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .unwrap_or_default();
        Ok(answer)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: String,
}

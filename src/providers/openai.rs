//! OpenAI-compatible chat completions backend.
//!
//! Serves Groq, OpenAI and OpenRouter, which share the Chat Completions wire
//! format and differ only in base URL and a couple of headers.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{
    http_client, wrap_reasoning, BackendError, BackendKind, Generate, GenerationRequest,
    HostedProvider,
};

/// Referer sent to OpenRouter for app attribution
const OPENROUTER_REFERER: &str = "https://github.com/shellsage/shellsage";

/// App title sent to OpenRouter
const OPENROUTER_TITLE: &str = "shellsage";

/// Chat-completions backend
pub struct HostedBackend {
    client: Client,
    provider: HostedProvider,
    api_key: String,
    model: String,
    endpoint: String,
    temperature: f32,
}

impl HostedBackend {
    pub fn new(
        provider: HostedProvider,
        api_key: String,
        model: String,
        base_url: &str,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            client: http_client(timeout)?,
            provider,
            api_key,
            model,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            temperature,
        })
    }

    pub fn provider(&self) -> HostedProvider {
        self.provider
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build the request body
    fn build_request(&self, request: &GenerationRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            temperature: self.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        }
    }
}

#[async_trait]
impl Generate for HostedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::HostedApi
    }

    fn name(&self) -> &'static str {
        self.provider.label()
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        let provider = self.provider.label();
        let body = self.build_request(request);
        debug!(
            provider,
            model = %self.model,
            endpoint = %self.endpoint,
            max_tokens = request.max_tokens,
            "sending chat completion request"
        );

        let mut builder = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body);
        if self.provider == HostedProvider::OpenRouter {
            builder = builder
                .header("HTTP-Referer", OPENROUTER_REFERER)
                .header("X-Title", OPENROUTER_TITLE);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| BackendError::from_http(provider, e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(provider, status, &error_body));
        }

        let response_body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::from_http(provider, e))?;

        let message = response_body
            .choices
            .into_iter()
            .find_map(|choice| choice.message)
            .ok_or_else(|| {
                BackendError::upstream(format!("Invalid response from {}: no choices", provider))
            })?;
        debug!(
            chars = message.content.as_deref().map_or(0, str::len),
            "received chat completion"
        );

        let reasoning = message.reasoning_content.or(message.reasoning);
        Ok(wrap_reasoning(
            reasoning.as_deref(),
            message.content.as_deref().unwrap_or_default(),
        ))
    }
}

// API types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

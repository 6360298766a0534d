//! Anthropic Messages API backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{http_client, wrap_reasoning, BackendError, BackendKind, Generate, GenerationRequest};

/// Anthropic API version
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic backend
pub struct AnthropicBackend {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
    temperature: f32,
}

impl AnthropicBackend {
    pub fn new(
        api_key: String,
        model: String,
        base_url: &str,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            model,
            endpoint: format!("{}/messages", base_url.trim_end_matches('/')),
            temperature,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build the request body
    fn build_request(&self, request: &GenerationRequest) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            temperature: self.temperature,
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
        }
    }
}

#[async_trait]
impl Generate for AnthropicBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::HostedApi
    }

    fn name(&self) -> &'static str {
        "Anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        let body = self.build_request(request);
        debug!(
            model = %self.model,
            endpoint = %self.endpoint,
            max_tokens = request.max_tokens,
            "sending messages request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::from_http("Anthropic", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status("Anthropic", status, &error_body));
        }

        let response_body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| BackendError::from_http("Anthropic", e))?;

        Ok(join_blocks(response_body.content))
    }
}

/// Concatenate text blocks, keeping thinking blocks as a leading think section
fn join_blocks(blocks: Vec<ContentBlock>) -> String {
    let mut text = String::new();
    let mut thinking = String::new();
    for block in blocks {
        match block.content_type.as_str() {
            "text" => text.push_str(&block.text),
            "thinking" => thinking.push_str(&block.thinking),
            _ => {}
        }
    }
    wrap_reasoning(Some(&thinking), &text)
}

// API types

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    thinking: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() {
        let backend = AnthropicBackend::new(
            "test-key".to_string(),
            "claude-3-5-haiku-latest".to_string(),
            "https://api.anthropic.com/v1",
            0.1,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(backend.endpoint(), "https://api.anthropic.com/v1/messages");
        assert_eq!(backend.kind(), BackendKind::HostedApi);
        assert_eq!(backend.name(), "Anthropic");
    }

    #[test]
    fn test_join_blocks_wraps_thinking() {
        let response: MessagesResponse = serde_json::from_str(
            r#"{"content":[
                {"type":"thinking","thinking":"check permissions"},
                {"type":"text","text":"🔍 Root Cause: denied"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(
            join_blocks(response.content),
            "<think>check permissions</think>\n🔍 Root Cause: denied"
        );
    }

    #[test]
    fn test_join_blocks_text_only() {
        let response: MessagesResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"a"},{"type":"tool_use","id":"x"},{"type":"text","text":"b"}]}"#,
        )
        .unwrap();
        assert_eq!(join_blocks(response.content), "ab");
    }
}

//! Local Ollama daemon backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{http_client, wrap_reasoning, BackendError, BackendKind, Generate, GenerationRequest};

/// Ollama backend
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    stop: Vec<String>,
}

impl OllamaBackend {
    pub fn new(
        base_url: &str,
        model: &str,
        temperature: f32,
        stop: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature,
            stop,
        })
    }

    fn build_request<'a>(&'a self, request: &'a GenerationRequest) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: request.max_tokens,
                stop: &self.stop,
            },
        }
    }

    /// List models installed in the daemon
    pub async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BackendError::from_http("Ollama", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status("Ollama", status, &error_body));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| BackendError::from_http("Ollama", e))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl Generate for OllamaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalDaemon
    }

    fn name(&self) -> &'static str {
        "Ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        let url = format!("{}/api/generate", self.base_url);
        debug!(
            model = %self.model,
            %url,
            max_tokens = request.max_tokens,
            "sending generate request"
        );

        let response = self
            .client
            .post(&url)
            .json(&self.build_request(request))
            .send()
            .await
            .map_err(|e| BackendError::from_http("Ollama", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status("Ollama", status, &error_body));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| BackendError::from_http("Ollama", e))?;
        debug!(
            chars = body.response.len(),
            eval_count = ?body.eval_count,
            "received generate response"
        );

        Ok(wrap_reasoning(body.thinking.as_deref(), &body.response))
    }
}

// API types

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions<'a>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions<'a> {
    temperature: f32,
    num_predict: u32,
    #[serde(skip_serializing_if = "no_stop")]
    stop: &'a [String],
}

fn no_stop(stop: &&[String]) -> bool {
    stop.is_empty()
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    thinking: Option<String>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(stop: Vec<String>) -> OllamaBackend {
        OllamaBackend::new(
            "http://localhost:11434/",
            "llama3:8b-instruct-q4_1",
            0.1,
            stop,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "hello".to_string(),
            max_tokens: 128,
            target: BackendKind::LocalDaemon,
            model: "llama3:8b-instruct-q4_1".to_string(),
        }
    }

    #[test]
    fn test_request_is_non_streaming() {
        let b = backend(vec!["\n\n\n".to_string()]);
        let req = request();
        let body = serde_json::to_value(b.build_request(&req)).unwrap();
        assert_eq!(body["stream"], false);
        assert_eq!(body["model"], "llama3:8b-instruct-q4_1");
        assert_eq!(body["options"]["num_predict"], 128);
        assert_eq!(body["options"]["stop"][0], "\n\n\n");
    }

    #[test]
    fn test_empty_stop_omitted() {
        let b = backend(Vec::new());
        let req = request();
        let body = serde_json::to_value(b.build_request(&req)).unwrap();
        assert!(body["options"].get("stop").is_none());
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let b = backend(Vec::new());
        assert_eq!(b.base_url, "http://localhost:11434");
        assert_eq!(b.kind(), BackendKind::LocalDaemon);
    }
}

//! Generation backend abstraction.
//!
//! Every backend turns a prompt string into a raw response string. Callers
//! hold a [`Backend`] and never see the wire formats behind it: hosted
//! chat-completion APIs, the Anthropic Messages API, a local Ollama daemon,
//! or the in-process llama.cpp runtime.

pub mod anthropic;
pub mod local;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::{Config, LocalEngine, Mode};

pub use anthropic::AnthropicBackend;
pub use local::LocalBackend;
pub use ollama::OllamaBackend;
pub use openai::HostedBackend;

/// Connect timeout for every HTTP backend
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Which kind of backend a request is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    HostedApi,
    LocalDaemon,
    InProcess,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::HostedApi => write!(f, "hosted API"),
            BackendKind::LocalDaemon => write!(f, "local daemon"),
            BackendKind::InProcess => write!(f, "in-process"),
        }
    }
}

/// Hosted API providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HostedProvider {
    /// Groq (OpenAI-compatible)
    #[default]
    Groq,
    /// OpenAI API
    #[value(name = "openai")]
    OpenAI,
    /// OpenRouter API (access to multiple models)
    #[value(name = "openrouter")]
    OpenRouter,
    /// Anthropic Claude API
    Anthropic,
}

impl HostedProvider {
    /// Default API base URL
    pub fn default_base_url(self) -> &'static str {
        match self {
            HostedProvider::Groq => "https://api.groq.com/openai/v1",
            HostedProvider::OpenAI => "https://api.openai.com/v1",
            HostedProvider::OpenRouter => "https://openrouter.ai/api/v1",
            HostedProvider::Anthropic => "https://api.anthropic.com/v1",
        }
    }

    /// Model used when none is configured
    pub fn default_model(self) -> &'static str {
        match self {
            HostedProvider::Groq => "llama3-8b-8192",
            HostedProvider::OpenAI => "gpt-4o-mini",
            HostedProvider::OpenRouter => "meta-llama/llama-3.1-8b-instruct",
            HostedProvider::Anthropic => "claude-3-5-haiku-latest",
        }
    }

    /// Display name
    pub fn label(self) -> &'static str {
        match self {
            HostedProvider::Groq => "Groq",
            HostedProvider::OpenAI => "OpenAI",
            HostedProvider::OpenRouter => "OpenRouter",
            HostedProvider::Anthropic => "Anthropic",
        }
    }
}

impl fmt::Display for HostedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostedProvider::Groq => write!(f, "groq"),
            HostedProvider::OpenAI => write!(f, "openai"),
            HostedProvider::OpenRouter => write!(f, "openrouter"),
            HostedProvider::Anthropic => write!(f, "anthropic"),
        }
    }
}

impl std::str::FromStr for HostedProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "groq" => Ok(HostedProvider::Groq),
            "openai" => Ok(HostedProvider::OpenAI),
            "openrouter" => Ok(HostedProvider::OpenRouter),
            "anthropic" => Ok(HostedProvider::Anthropic),
            _ => Err(format!(
                "Unknown provider: {}. Valid options: groq, openai, openrouter, anthropic",
                s
            )),
        }
    }
}

/// A single generation request
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub target: BackendKind,
    pub model: String,
}

/// Failure categories shared by all backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendErrorKind {
    AuthenticationMissing,
    NetworkUnreachable,
    ModelLoadFailure,
    UpstreamError,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendErrorKind::AuthenticationMissing => "AuthenticationMissing",
            BackendErrorKind::NetworkUnreachable => "NetworkUnreachable",
            BackendErrorKind::ModelLoadFailure => "ModelLoadFailure",
            BackendErrorKind::UpstreamError => "UpstreamError",
        };
        f.write_str(name)
    }
}

/// Error raised by a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn missing_key(provider: HostedProvider) -> Self {
        Self::new(
            BackendErrorKind::AuthenticationMissing,
            format!(
                "API key not configured for {}. Set {} or api.key in the config file.",
                provider.label(),
                get_api_key_env_var(provider)
            ),
        )
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::UpstreamError, message)
    }

    pub fn model_load(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::ModelLoadFailure, message)
    }

    /// Map a transport error from reqwest
    pub fn from_http(provider: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::new(
                BackendErrorKind::NetworkUnreachable,
                format!("{} unreachable: {}", provider, err),
            )
        } else if err.is_decode() {
            Self::upstream(format!("Invalid response from {}: {}", provider, err))
        } else if err.is_request() && err.status().is_none() {
            Self::new(
                BackendErrorKind::NetworkUnreachable,
                format!("Request to {} failed: {}", provider, err),
            )
        } else {
            Self::upstream(format!("{} request failed: {}", provider, err))
        }
    }

    /// Map a non-success HTTP status
    pub fn from_status(provider: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let message = if status.as_u16() == 429 {
            format!("Rate limited by {}. Please wait and try again.", provider)
        } else {
            format!("API error from {}: HTTP {}: {}", provider, status, body.trim())
        };
        Self::upstream(message)
    }
}

/// Capability every backend provides
#[async_trait]
pub trait Generate: Send + Sync {
    /// Kind of backend
    fn kind(&self) -> BackendKind;

    /// Provider name for display
    fn name(&self) -> &'static str;

    /// Model identifier
    fn model_name(&self) -> &str;

    /// Produce a raw response for a prompt
    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError>;
}

/// The closed set of backends
pub enum Backend {
    Hosted(HostedBackend),
    Anthropic(AnthropicBackend),
    Daemon(OllamaBackend),
    InProcess(LocalBackend),
}

impl Backend {
    /// Build the backend selected by the configuration.
    ///
    /// Credentials are checked here so a missing key is reported before any
    /// network traffic.
    pub fn from_config(config: &Config) -> Result<Self, BackendError> {
        let generation = &config.generation;
        let timeout = Duration::from_secs(generation.timeout_secs.max(1));
        let temperature = generation.effective_temperature();

        match config.mode {
            Mode::Local => match config.local.engine {
                LocalEngine::Ollama => Ok(Backend::Daemon(OllamaBackend::new(
                    &config.local.url,
                    &config.local.model,
                    temperature,
                    generation.stop.clone(),
                    timeout,
                )?)),
                LocalEngine::LlamaCpp => Ok(Backend::InProcess(LocalBackend::new(
                    &config.local.model,
                    config.local.template,
                    temperature,
                    timeout,
                ))),
            },
            Mode::Api => {
                let provider = config.api.provider;
                let api_key = config
                    .api_key()
                    .ok_or_else(|| BackendError::missing_key(provider))?;
                let model = if config.api.model.trim().is_empty() {
                    provider.default_model().to_string()
                } else {
                    config.api.model.clone()
                };
                let base_url = config
                    .api
                    .base_url
                    .clone()
                    .unwrap_or_else(|| provider.default_base_url().to_string());

                match provider {
                    HostedProvider::Anthropic => Ok(Backend::Anthropic(AnthropicBackend::new(
                        api_key,
                        model,
                        &base_url,
                        temperature,
                        timeout,
                    )?)),
                    _ => Ok(Backend::Hosted(HostedBackend::new(
                        provider,
                        api_key,
                        model,
                        &base_url,
                        temperature,
                        timeout,
                    )?)),
                }
            }
        }
    }

    fn inner(&self) -> &dyn Generate {
        match self {
            Backend::Hosted(b) => b,
            Backend::Anthropic(b) => b,
            Backend::Daemon(b) => b,
            Backend::InProcess(b) => b,
        }
    }

    /// Generate a response for a prompt
    pub async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, BackendError> {
        let request = GenerationRequest {
            prompt: prompt.to_string(),
            max_tokens,
            target: self.kind(),
            model: self.model_name().to_string(),
        };
        Generate::generate(self, &request).await
    }
}

#[async_trait]
impl Generate for Backend {
    fn kind(&self) -> BackendKind {
        self.inner().kind()
    }

    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn model_name(&self) -> &str {
        self.inner().model_name()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        self.inner().generate(request).await
    }
}

/// Build an HTTP client with the request and connect timeouts applied
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .build()
        .map_err(|e| BackendError::upstream(format!("Failed to build HTTP client: {}", e)))
}

/// Prefix provider-native reasoning so the normalizer can extract it
pub(crate) fn wrap_reasoning(reasoning: Option<&str>, answer: &str) -> String {
    match reasoning.map(str::trim).filter(|r| !r.is_empty()) {
        Some(reasoning) => format!("<think>{}</think>\n{}", reasoning, answer),
        None => answer.to_string(),
    }
}

/// Get the appropriate environment variable name for a provider's API key
pub fn get_api_key_env_var(provider: HostedProvider) -> &'static str {
    match provider {
        HostedProvider::Groq => "GROQ_API_KEY",
        HostedProvider::OpenAI => "OPENAI_API_KEY",
        HostedProvider::OpenRouter => "OPENROUTER_API_KEY",
        HostedProvider::Anthropic => "ANTHROPIC_API_KEY",
    }
}

/// Get API key from environment for a provider
pub fn get_api_key(provider: HostedProvider) -> Option<String> {
    std::env::var(get_api_key_env_var(provider))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// List all hosted providers with whether a key is present in the environment
pub fn list_providers() -> Vec<(HostedProvider, bool)> {
    [
        HostedProvider::Groq,
        HostedProvider::OpenAI,
        HostedProvider::OpenRouter,
        HostedProvider::Anthropic,
    ]
    .into_iter()
    .map(|p| (p, get_api_key(p).is_some()))
    .collect()
}

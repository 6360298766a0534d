//! Configuration system for `shellsage`.
//!
//! The configuration is read once at startup into an immutable [`Config`]
//! value that is handed to the backend factory. Only the `config` subcommand
//! writes it back.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::model::ModelFamily;
use crate::providers::HostedProvider;

/// Upper bound on sampling temperature; the parser relies on stable formatting.
pub const MAX_TEMPERATURE: f32 = 0.2;

/// Error raised while reading or writing configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine the configuration directory")]
    NoConfigDir,

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Operation mode: local inference or hosted API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Local,
    Api,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Local => write!(f, "local"),
            Mode::Api => write!(f, "api"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Mode::Local),
            "api" => Ok(Mode::Api),
            _ => Err(format!("Unknown mode: {}. Valid options: local, api", s)),
        }
    }
}

/// Engine used in local mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LocalEngine {
    /// Ollama HTTP daemon
    #[default]
    Ollama,
    /// In-process llama.cpp runtime loading a GGUF file
    LlamaCpp,
}

impl fmt::Display for LocalEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalEngine::Ollama => write!(f, "ollama"),
            LocalEngine::LlamaCpp => write!(f, "llama-cpp"),
        }
    }
}

impl std::str::FromStr for LocalEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(LocalEngine::Ollama),
            "llama-cpp" | "llamacpp" | "llama.cpp" | "gguf" => Ok(LocalEngine::LlamaCpp),
            _ => Err(format!(
                "Unknown local engine: {}. Valid options: ollama, llama-cpp",
                s
            )),
        }
    }
}

/// Settings for local mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub engine: LocalEngine,
    /// Ollama model tag, or GGUF path for llama-cpp
    pub model: String,
    /// Ollama daemon URL
    pub url: String,
    /// Prompt template override for llama-cpp (auto-detected otherwise)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<ModelFamily>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            engine: LocalEngine::Ollama,
            model: "llama3:8b-instruct-q4_1".to_string(),
            url: "http://localhost:11434".to_string(),
            template: None,
        }
    }
}

/// Settings for API mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub provider: HostedProvider,
    pub model: String,
    /// API key; the provider's environment variable takes precedence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Endpoint override for OpenAI-compatible servers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        let provider = HostedProvider::default();
        Self {
            provider,
            model: provider.default_model().to_string(),
            key: None,
            base_url: None,
        }
    }
}

/// Sampling and transport settings shared by all backends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    /// Request timeout for HTTP backends and generation budget in-process
    pub timeout_secs: u64,
    /// Stop sequences sent to the local daemon
    pub stop: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.1,
            timeout_secs: 60,
            stop: vec!["\n\n\n".to_string()],
        }
    }
}

impl GenerationConfig {
    /// Temperature clamped to the range the parser tolerates
    pub fn effective_temperature(&self) -> f32 {
        if self.temperature > MAX_TEMPERATURE {
            warn!(
                configured = self.temperature,
                max = MAX_TEMPERATURE,
                "temperature too high for stable output, clamping"
            );
        }
        self.temperature.clamp(0.0, MAX_TEMPERATURE)
    }
}

/// Context gathering bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Number of prior commands kept
    pub history_capacity: usize,
    /// Leading characters of error output kept when truncating
    pub error_head_chars: usize,
    /// Trailing characters of error output kept when truncating
    pub error_tail_chars: usize,
    pub max_relevant_files: usize,
    /// Include a man page excerpt for the failing command
    pub man_page: bool,
    /// In hook mode, re-run the failed command to capture its stderr
    pub rerun_on_analyze: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            history_capacity: 10,
            error_head_chars: 500,
            error_tail_chars: 500,
            max_relevant_files: 3,
            man_page: true,
            rerun_on_analyze: true,
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    pub local: LocalConfig,
    pub api: ApiConfig,
    pub generation: GenerationConfig,
    pub context: ContextConfig,
}

impl Config {
    /// Load config from the default location with environment overrides.
    /// Falls back to defaults if the file is missing or invalid.
    pub fn load() -> Self {
        let mut config = match Self::config_path() {
            Some(path) => Self::load_from_path(&path).unwrap_or_else(|err| {
                warn!(%err, "using default configuration");
                Self::default()
            }),
            None => Self::default(),
        };
        config.apply_env_overrides();
        config
    }

    /// Load config from a specific path; a missing file yields defaults
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the file at `path` as written, apply `edit` and save it back.
    ///
    /// `SHELLSAGE_MODE`/`SHELLSAGE_MODEL` are not applied, and a file that
    /// fails to parse is an error rather than defaults.
    pub fn edit_at(path: &Path, edit: impl FnOnce(&mut Config)) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_path(path)?;
        edit(&mut config);
        config.save_to_path(path)?;
        Ok(config)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to_path(&path)?;
        Ok(path)
    }

    /// Save config to a specific path, creating parent directories
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Get the config file path (~/.config/shellsage/config.toml)
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("shellsage").join("config.toml"))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(mode) = env::var("SHELLSAGE_MODE") {
            match mode.parse() {
                Ok(mode) => self.mode = mode,
                Err(err) => warn!(%err, "ignoring SHELLSAGE_MODE"),
            }
        }

        if let Ok(model) = env::var("SHELLSAGE_MODEL") {
            if !model.trim().is_empty() {
                self.set_active_model(model.trim());
            }
        }
    }

    /// Model identifier of the active backend
    pub fn active_model(&self) -> &str {
        match self.mode {
            Mode::Local => &self.local.model,
            Mode::Api => &self.api.model,
        }
    }

    /// Replace the model of the active backend
    pub fn set_active_model(&mut self, model: &str) {
        match self.mode {
            Mode::Local => self.local.model = model.to_string(),
            Mode::Api => self.api.model = model.to_string(),
        }
    }

    /// Switch the hosted provider, resetting the model to its default
    pub fn set_provider(&mut self, provider: HostedProvider) {
        if self.api.provider != provider {
            self.api.provider = provider;
            self.api.model = provider.default_model().to_string();
        }
    }

    /// API key for the configured hosted provider: environment first, then file
    pub fn api_key(&self) -> Option<String> {
        crate::providers::get_api_key(self.api.provider).or_else(|| {
            self.api
                .key
                .as_ref()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
        })
    }
}

/// Generate default config as TOML string
pub fn generate_default_config() -> String {
    r#"# shellsage configuration
# Place this file at ~/.config/shellsage/config.toml

# "local" (Ollama or llama.cpp) or "api" (hosted provider)
mode = "local"

[local]
# "ollama" or "llama-cpp"
engine = "ollama"
# Ollama model tag, or path to a GGUF file for llama-cpp
model = "llama3:8b-instruct-q4_1"
url = "http://localhost:11434"

[api]
# groq, openai, openrouter or anthropic
provider = "groq"
model = "llama3-8b-8192"
# key = "..."   (prefer GROQ_API_KEY / OPENAI_API_KEY / ...)

[generation]
max_tokens = 1024
# Values above 0.2 are clamped
temperature = 0.1
timeout_secs = 60

[context]
history_capacity = 10
error_head_chars = 500
error_tail_chars = 500
max_relevant_files = 3
man_page = true
rerun_on_analyze = true

# Environment variable overrides:
# SHELLSAGE_MODE=api|local  - Override operation mode
# SHELLSAGE_MODEL=<model>   - Override the active model
# SHELLSAGE_LOG=<filter>    - Log filter (e.g. shellsage=debug)
"#
    .to_string()
}

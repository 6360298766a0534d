//! The generate, normalize, parse cycle.
//!
//! A backend failure never escapes as an error here: it becomes a record with
//! the failure text in the risk (or warning) field and no fix or command, so
//! the caller can always render something.

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::context::{DiagnosticContext, EnvironmentFacts};
use crate::normalize::normalize;
use crate::parser::{CommandPlan, ParsedSolution};
use crate::prompt::{command_prompt, diagnosis_prompt};
use crate::providers::{Backend, BackendError, Generate};

/// Result of diagnosing a failed command
#[derive(Debug, Clone, Serialize)]
pub struct Diagnosis {
    pub solution: ParsedSolution,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub thinking: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<BackendError>,
}

/// Result of generating commands for a request
#[derive(Debug, Clone, Serialize)]
pub struct Generation {
    pub plan: CommandPlan,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub thinking: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<BackendError>,
}

/// Owns a backend and runs both assistant flows against it
pub struct Assistant {
    backend: Backend,
    max_tokens: u32,
}

impl Assistant {
    pub fn new(backend: Backend, max_tokens: u32) -> Self {
        Self {
            backend,
            max_tokens,
        }
    }

    /// Build the configured backend; fails before any request when credentials are missing
    pub fn from_config(config: &Config) -> Result<Self, BackendError> {
        let backend = Backend::from_config(config)?;
        debug!(
            backend = backend.name(),
            kind = %backend.kind(),
            model = backend.model_name(),
            "assistant ready"
        );
        Ok(Self::new(backend, config.generation.max_tokens))
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Diagnose a failed command
    pub async fn diagnose(&self, context: &DiagnosticContext) -> Diagnosis {
        let prompt = diagnosis_prompt(context);
        debug!(chars = prompt.chars().count(), "diagnosis prompt built");

        match self.backend.generate(&prompt, self.max_tokens).await {
            Ok(raw) => {
                let normalized = normalize(&raw);
                let solution = ParsedSolution::from_normalized(&normalized.text);
                if solution.is_empty() {
                    warn!("no recognizable fields in the diagnosis response");
                }
                Diagnosis {
                    solution,
                    thinking: normalized.thinking,
                    raw_response: Some(raw),
                    failure: None,
                }
            }
            Err(err) => {
                warn!(%err, "diagnosis failed");
                Diagnosis {
                    solution: ParsedSolution::unavailable(err.to_string()),
                    thinking: Vec::new(),
                    raw_response: None,
                    failure: Some(err),
                }
            }
        }
    }

    /// Generate commands for a natural-language request
    pub async fn generate_commands(&self, query: &str, facts: &EnvironmentFacts) -> Generation {
        let prompt = command_prompt(query, facts);
        debug!(chars = prompt.chars().count(), "command prompt built");

        match self.backend.generate(&prompt, self.max_tokens).await {
            Ok(raw) => {
                let normalized = normalize(&raw);
                let plan = CommandPlan::from_normalized(&normalized.text);
                if plan.steps.is_empty() {
                    warn!("no command found in the generation response");
                }
                Generation {
                    plan,
                    thinking: normalized.thinking,
                    raw_response: Some(raw),
                    failure: None,
                }
            }
            Err(err) => {
                warn!(%err, "command generation failed");
                Generation {
                    plan: CommandPlan::unavailable(err.to_string()),
                    thinking: Vec::new(),
                    raw_response: None,
                    failure: Some(err),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LocalEngine, Mode};
    use crate::providers::BackendErrorKind;

    fn unreachable_config() -> Config {
        let mut config = Config::default();
        config.mode = Mode::Local;
        config.local.engine = LocalEngine::Ollama;
        config.local.url = "http://127.0.0.1:1".to_string();
        config.generation.timeout_secs = 2;
        config
    }

    #[tokio::test]
    async fn test_diagnose_unreachable_backend() {
        let assistant = Assistant::from_config(&unreachable_config()).unwrap();
        let ctx = DiagnosticContext::new("ls /root", 2).error_output("Permission denied");

        let diagnosis = assistant.diagnose(&ctx).await;
        let failure = diagnosis.failure.expect("failure recorded");
        assert_eq!(failure.kind, BackendErrorKind::NetworkUnreachable);
        assert!(diagnosis.solution.fix.is_none());
        assert!(diagnosis
            .solution
            .risk
            .as_deref()
            .unwrap()
            .starts_with("NetworkUnreachable: "));
    }

    #[tokio::test]
    async fn test_generate_commands_unreachable_backend() {
        let assistant = Assistant::from_config(&unreachable_config()).unwrap();
        let facts = EnvironmentFacts {
            os: "linux".to_string(),
            cwd: "/tmp".to_string(),
            git: false,
            history: Vec::new(),
        };

        let generation = assistant.generate_commands("list files", &facts).await;
        assert!(generation.plan.steps.is_empty());
        assert!(generation.plan.command().is_none());
        assert!(generation
            .plan
            .warning
            .as_deref()
            .unwrap()
            .starts_with("NetworkUnreachable: "));
    }
}

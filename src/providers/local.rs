//! In-process llama.cpp backend.
//!
//! The loaded model lives in a single slot owned by the backend and is
//! reused across requests until a different model path is requested.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{BackendError, BackendErrorKind, BackendKind, Generate, GenerationRequest};
use crate::model::{
    build_prompt, detect_model_family, is_degenerate_response, InferenceError, LoadedModel,
    ModelFamily, SamplingParams, MAX_RETRIES,
};

/// Local LLM backend
pub struct LocalBackend {
    model_path: PathBuf,
    model_name: String,
    family: ModelFamily,
    temperature: f32,
    timeout: Duration,
    slot: Arc<Mutex<Option<LoadedModel>>>,
}

impl LocalBackend {
    pub fn new(
        model_path: &str,
        family: Option<ModelFamily>,
        temperature: f32,
        timeout: Duration,
    ) -> Self {
        let model_path = PathBuf::from(model_path);
        let family = family.unwrap_or_else(|| detect_model_family(&model_path));
        Self {
            model_name: model_path.display().to_string(),
            model_path,
            family,
            temperature,
            timeout,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    /// Whether a model currently occupies the cache slot
    pub fn is_loaded(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }
}

impl From<InferenceError> for BackendError {
    fn from(err: InferenceError) -> Self {
        let kind = match err {
            InferenceError::NotFound(_)
            | InferenceError::Backend(_)
            | InferenceError::Load { .. }
            | InferenceError::Context(_)
            | InferenceError::Tokenize(_) => BackendErrorKind::ModelLoadFailure,
            InferenceError::Decode(_) => BackendErrorKind::UpstreamError,
        };
        BackendError::new(kind, err.to_string())
    }
}

/// Load (or reuse) the model in the slot and generate, retrying degenerate output
fn generate_blocking(
    slot: &Mutex<Option<LoadedModel>>,
    model_path: &Path,
    prompt: &str,
    params: &SamplingParams,
    deadline: Instant,
) -> Result<String, BackendError> {
    let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    if slot.as_ref().map(|m| m.path() != model_path).unwrap_or(true) {
        // Drop the previous model before loading so two never coexist in memory
        *slot = None;
        *slot = Some(LoadedModel::load(model_path)?);
    }
    let model = slot
        .as_ref()
        .ok_or_else(|| BackendError::model_load("model slot empty after load"))?;

    let mut last = String::new();
    for attempt in 0..=MAX_RETRIES {
        let (output, stats) = model.infer(prompt, params, deadline)?;
        if stats.timed_out {
            warn!(generated = stats.generated_tokens, "generation hit the deadline");
            if output.trim().is_empty() {
                return Err(BackendError::new(
                    BackendErrorKind::NetworkUnreachable,
                    "local generation timed out before producing output",
                ));
            }
            return Ok(output);
        }
        if !is_degenerate_response(&output) {
            return Ok(output);
        }
        debug!(attempt, "degenerate output, retrying");
        last = output;
    }

    warn!("output still degenerate after {} retries", MAX_RETRIES);
    Ok(last)
}

#[async_trait]
impl Generate for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::InProcess
    }

    fn name(&self) -> &'static str {
        "Local LLM"
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        let prompt = build_prompt(&request.prompt, self.family);
        let params = SamplingParams {
            temperature: self.temperature,
            max_tokens: request.max_tokens as usize,
            ..SamplingParams::default()
        };
        let deadline = Instant::now() + self.timeout;
        let slot = Arc::clone(&self.slot);
        let model_path = if request.model.is_empty() {
            self.model_path.clone()
        } else {
            PathBuf::from(&request.model)
        };
        debug!(model = %model_path.display(), family = %self.family, "running local inference");

        tokio::task::spawn_blocking(move || {
            generate_blocking(&slot, &model_path, &prompt, &params, deadline)
        })
        .await
        .map_err(|e| BackendError::upstream(format!("inference task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_backend_creation() {
        let backend = LocalBackend::new(
            "/models/gemma-3-270m-it-Q8_0.gguf",
            None,
            0.1,
            Duration::from_secs(30),
        );
        assert_eq!(backend.kind(), BackendKind::InProcess);
        assert_eq!(backend.name(), "Local LLM");
        assert_eq!(backend.family(), ModelFamily::Gemma);
        assert!(!backend.is_loaded());
    }

    #[test]
    fn test_template_override() {
        let backend = LocalBackend::new(
            "/models/custom.gguf",
            Some(ModelFamily::Gemma),
            0.1,
            Duration::from_secs(30),
        );
        assert_eq!(backend.family(), ModelFamily::Gemma);
    }

    #[tokio::test]
    async fn test_missing_model_is_load_failure() {
        let backend = LocalBackend::new(
            "/nonexistent/model.gguf",
            None,
            0.1,
            Duration::from_secs(5),
        );
        let request = GenerationRequest {
            prompt: "hello".to_string(),
            max_tokens: 16,
            target: BackendKind::InProcess,
            model: String::new(),
        };
        let err = backend.generate(&request).await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::ModelLoadFailure);
        assert!(!backend.is_loaded());
    }
}

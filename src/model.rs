//! In-process llama.cpp runtime: prompt templates, model loading and inference.

use clap::ValueEnum;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::LlamaModel;
use llama_cpp_2::model::{AddBos, Special};
use llama_cpp_2::sampling::LlamaSampler;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Model family for prompt template selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    /// Qwen models - uses ChatML format
    Qwen,
    /// Gemma models - uses Gemma format
    Gemma,
    /// SmolLM models - uses ChatML format
    Smollm,
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelFamily::Qwen => write!(f, "qwen (ChatML)"),
            ModelFamily::Gemma => write!(f, "gemma (Gemma format)"),
            ModelFamily::Smollm => write!(f, "smollm (ChatML)"),
        }
    }
}

/// Errors from the in-process runtime
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Model not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to initialize llama.cpp backend: {0}")]
    Backend(String),

    #[error("Failed to load model {path}: {message}")]
    Load { path: PathBuf, message: String },

    #[error("Failed to create context: {0}")]
    Context(String),

    #[error("Failed to tokenize prompt: {0}")]
    Tokenize(String),

    #[error("Inference failed: {0}")]
    Decode(String),
}

/// Sampling parameters for inference
#[derive(Debug, Clone)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub seed: Option<u32>,
    pub max_tokens: usize,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.9,
            top_k: 40,
            seed: None,
            max_tokens: 1024,
        }
    }
}

/// Statistics from an inference run
#[derive(Debug, Serialize)]
pub struct InferenceStats {
    pub backend: String,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub total_tokens: usize,
    pub prompt_eval_ms: u128,
    pub generation_ms: u128,
    pub total_ms: u128,
    pub gen_tok_per_s: f64,
    /// Generation stopped at the deadline rather than end-of-generation
    pub timed_out: bool,
}

/// Maximum number of retries when detecting degenerate output
pub const MAX_RETRIES: usize = 2;

/// Context window requested from llama.cpp
pub const CONTEXT_TOKENS: u32 = 4096;

/// ChatML template for Qwen and SmolLM models
const TEMPLATE_CHATML: &str = "<|im_start|>system
You are a concise Linux terminal expert. Follow the requested output format exactly.<|im_end|>
<|im_start|>user
{prompt}<|im_end|>
<|im_start|>assistant
";

/// Gemma template using <start_of_turn> format
const TEMPLATE_GEMMA: &str = "<start_of_turn>user
You are a concise Linux terminal expert. Follow the requested output format exactly.

{prompt}<end_of_turn>
<start_of_turn>model
";

pub fn backend_mode() -> &'static str {
    if cfg!(feature = "metal") {
        "metal"
    } else if cfg!(feature = "cuda") {
        "cuda"
    } else if cfg!(feature = "vulkan") {
        "vulkan"
    } else {
        "cpu"
    }
}

/// Detect model family from filename/path
pub fn detect_model_family(model_path: &Path) -> ModelFamily {
    let filename = model_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();

    if filename.contains("gemma") {
        ModelFamily::Gemma
    } else if filename.contains("smol") {
        ModelFamily::Smollm
    } else {
        // ChatML also works for most generic instruct models
        ModelFamily::Qwen
    }
}

/// Wrap a prompt in the chat template of the model family
pub fn build_prompt(prompt: &str, family: ModelFamily) -> String {
    let template = match family {
        ModelFamily::Gemma => TEMPLATE_GEMMA,
        ModelFamily::Qwen | ModelFamily::Smollm => TEMPLATE_CHATML,
    };
    template.replace("{prompt}", prompt.trim())
}

/// Check if the response contains degenerate patterns (repetitive characters/sequences)
pub fn is_degenerate_response(response: &str) -> bool {
    let response = response.trim();

    if response.len() < 20 {
        return false;
    }

    let chars: Vec<char> = response.chars().collect();
    let mut max_run = 1;
    let mut current_run = 1;
    for pair in chars.windows(2) {
        // Runs of dashes or equals signs are common in legitimate tables and rules
        if pair[0] == pair[1] && !matches!(pair[0], '-' | '=' | '`' | ' ') {
            current_run += 1;
            max_run = max_run.max(current_run);
        } else {
            current_run = 1;
        }
    }
    if max_run > 20 {
        return true;
    }

    for pattern_len in 1..=4 {
        if chars.len() >= pattern_len * 10 {
            let pattern: String = chars.iter().take(pattern_len).collect();
            if !pattern.trim().is_empty() && response.contains(&pattern.repeat(10)) {
                return true;
            }
        }
    }

    let mut char_counts = std::collections::HashMap::new();
    for c in chars.iter().filter(|c| c.is_alphanumeric()) {
        *char_counts.entry(c).or_insert(0usize) += 1;
    }
    let alnum_count: usize = char_counts.values().sum();
    if alnum_count > 0 {
        if let Some(&max_count) = char_counts.values().max() {
            if max_count as f64 / alnum_count as f64 > 0.5 {
                return true;
            }
        }
    }

    let words: Vec<&str> = response.split_whitespace().collect();
    if words.len() >= 10 {
        let mut word_run = 1;
        let mut max_word_run = 1;
        for pair in words.windows(2) {
            if pair[0] == pair[1] {
                word_run += 1;
                max_word_run = max_word_run.max(word_run);
            } else {
                word_run = 1;
            }
        }
        if max_word_run > 5 {
            return true;
        }

        for pattern_len in 2..=3 {
            if words.len() >= pattern_len * 5 {
                let pattern = &words[..pattern_len];
                let matches = words
                    .chunks(pattern_len)
                    .filter(|chunk| *chunk == pattern)
                    .count();
                if matches >= 5 {
                    return true;
                }
            }
        }
    }

    false
}

/// Helper function to check if we can generate more tokens
pub fn can_generate_more(start_n: i32, n_cur: i32, max_gen_tokens: usize) -> bool {
    (n_cur - start_n) < max_gen_tokens as i32
}

/// Process-wide llama.cpp backend; it may only be initialized once
fn llama_backend() -> Result<&'static LlamaBackend, InferenceError> {
    static BACKEND: OnceLock<Result<LlamaBackend, String>> = OnceLock::new();
    BACKEND
        .get_or_init(|| LlamaBackend::init().map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|e| InferenceError::Backend(e.clone()))
}

/// A model held in memory together with the path it was loaded from
pub struct LoadedModel {
    path: PathBuf,
    model: LlamaModel,
}

impl LoadedModel {
    /// Load a GGUF model from disk
    pub fn load(path: &Path) -> Result<Self, InferenceError> {
        if !path.exists() {
            return Err(InferenceError::NotFound(path.to_path_buf()));
        }
        let backend = llama_backend()?;
        let model_params = LlamaModelParams::default().with_n_gpu_layers(1000);
        let start = Instant::now();
        let model = LlamaModel::load_from_file(backend, path, &model_params).map_err(|e| {
            InferenceError::Load {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        })?;
        debug!(
            path = %path.display(),
            backend = backend_mode(),
            load_ms = start.elapsed().as_millis() as u64,
            "model loaded"
        );
        Ok(Self {
            path: path.to_path_buf(),
            model,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run inference, stopping at end-of-generation, the token budget, or the deadline
    pub fn infer(
        &self,
        prompt: &str,
        params: &SamplingParams,
        deadline: Instant,
    ) -> Result<(String, InferenceStats), InferenceError> {
        let total_start = Instant::now();
        let backend = llama_backend()?;
        let model = &self.model;

        let ctx_params = LlamaContextParams::default().with_n_ctx(NonZeroU32::new(CONTEXT_TOKENS));
        let mut ctx = model
            .new_context(backend, ctx_params)
            .map_err(|e| InferenceError::Context(e.to_string()))?;

        let prompt_eval_start = Instant::now();
        let mut tokens = model
            .str_to_token(prompt, AddBos::Always)
            .map_err(|e| InferenceError::Tokenize(e.to_string()))?;
        if tokens.is_empty() {
            return Err(InferenceError::Tokenize("empty prompt".to_string()));
        }

        // Leave room in the context window for generation
        let max_gen_tokens = params.max_tokens.min(CONTEXT_TOKENS as usize / 2);
        let max_prompt_tokens = CONTEXT_TOKENS as usize - max_gen_tokens;
        if tokens.len() > max_prompt_tokens {
            warn!(
                from = tokens.len(),
                to = max_prompt_tokens,
                "prompt truncated to fit the context window"
            );
            tokens.truncate(max_prompt_tokens);
        }

        let batch_size = tokens.len().max(512);
        let mut batch = LlamaBatch::new(batch_size, 1);
        let last_idx = (tokens.len() - 1) as i32;
        for (i, token) in tokens.iter().enumerate() {
            batch
                .add(*token, i as i32, &[0], i as i32 == last_idx)
                .map_err(|e| InferenceError::Decode(e.to_string()))?;
        }
        ctx.decode(&mut batch)
            .map_err(|e| InferenceError::Decode(e.to_string()))?;
        let prompt_eval_ms = prompt_eval_start.elapsed().as_millis();

        let seed = params.seed.unwrap_or_else(|| {
            let t = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();
            (t ^ (t >> 32)) as u32
        });
        let mut sampler = LlamaSampler::chain_simple([
            LlamaSampler::top_k(params.top_k),
            LlamaSampler::top_p(params.top_p, 1),
            LlamaSampler::temp(params.temperature),
            LlamaSampler::dist(seed),
        ]);

        let mut decoder = encoding_rs::UTF_8.new_decoder();
        let mut n_cur = batch.n_tokens();
        let start_n = n_cur;
        let mut output = String::new();
        let mut timed_out = false;

        let generation_start = Instant::now();
        while can_generate_more(start_n, n_cur, max_gen_tokens) {
            if Instant::now() >= deadline {
                timed_out = true;
                break;
            }

            let token = sampler.sample(&ctx, batch.n_tokens() - 1);
            sampler.accept(token);

            if model.is_eog_token(token) {
                break;
            }

            let bytes = model
                .token_to_bytes(token, Special::Tokenize)
                .map_err(|e| InferenceError::Decode(e.to_string()))?;
            let capacity = decoder
                .max_utf8_buffer_length(bytes.len())
                .unwrap_or(bytes.len() * 3 + 4);
            let mut token_str = String::with_capacity(capacity);
            let _ = decoder.decode_to_string(&bytes, &mut token_str, false);
            output.push_str(&token_str);

            batch.clear();
            batch
                .add(token, n_cur, &[0], true)
                .map_err(|e| InferenceError::Decode(e.to_string()))?;
            ctx.decode(&mut batch)
                .map_err(|e| InferenceError::Decode(e.to_string()))?;
            n_cur += 1;
        }

        let generation_ms = generation_start.elapsed().as_millis();
        let total_ms = total_start.elapsed().as_millis();
        let prompt_tokens = tokens.len();
        let generated_tokens = (n_cur - start_n).max(0) as usize;
        let gen_tok_per_s = if generation_ms == 0 {
            0.0
        } else {
            (generated_tokens as f64) / (generation_ms as f64 / 1000.0)
        };

        let stats = InferenceStats {
            backend: backend_mode().to_string(),
            prompt_tokens,
            generated_tokens,
            total_tokens: prompt_tokens + generated_tokens,
            prompt_eval_ms,
            generation_ms,
            total_ms,
            gen_tok_per_s,
            timed_out,
        };
        debug!(?stats, "inference finished");

        Ok((output, stats))
    }
}

/// Route llama.cpp logs into tracing; silenced unless debugging
pub fn configure_runtime_logs(enabled: bool) {
    llama_cpp_2::send_logs_to_tracing(
        llama_cpp_2::LogOptions::default().with_logs_enabled(enabled),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_prompt_substitutes_prompt() {
        let prompt = build_prompt("permission denied", ModelFamily::Qwen);
        assert!(prompt.contains("permission denied"));
        assert!(prompt.contains("<|im_start|>"));
        assert!(prompt.ends_with("<|im_start|>assistant\n"));
    }

    #[test]
    fn test_build_prompt_trims_whitespace() {
        let prompt = build_prompt("  error with spaces  ", ModelFamily::Qwen);
        assert!(prompt.contains("error with spaces"));
        assert!(!prompt.contains("  error"));
    }

    #[test]
    fn test_build_prompt_gemma_template() {
        let prompt = build_prompt("test error", ModelFamily::Gemma);
        assert!(prompt.contains("test error"));
        assert!(prompt.contains("<start_of_turn>"));
        assert!(prompt.contains("<end_of_turn>"));
        assert!(!prompt.contains("<|im_start|>"));
    }

    #[test]
    fn test_build_prompt_preserves_markers() {
        let prompt = build_prompt("🔍 Root Cause:\n🛠️ Fix:", ModelFamily::Smollm);
        assert!(prompt.contains("🔍 Root Cause:\n🛠️ Fix:"));
    }

    #[test]
    fn test_detect_model_family() {
        assert_eq!(
            detect_model_family(&PathBuf::from("/m/qwen2.5-coder-0.5b-instruct-q8_0.gguf")),
            ModelFamily::Qwen
        );
        assert_eq!(
            detect_model_family(&PathBuf::from("/m/gemma-3-270m-it-Q8_0.gguf")),
            ModelFamily::Gemma
        );
        assert_eq!(
            detect_model_family(&PathBuf::from("/m/SmolLM2-135M-Instruct-Q8_0.gguf")),
            ModelFamily::Smollm
        );
        assert_eq!(
            detect_model_family(&PathBuf::from("/m/random-model.gguf")),
            ModelFamily::Qwen
        );
    }

    #[test]
    fn test_model_family_display() {
        assert_eq!(format!("{}", ModelFamily::Qwen), "qwen (ChatML)");
        assert_eq!(format!("{}", ModelFamily::Gemma), "gemma (Gemma format)");
    }

    #[test]
    fn test_sampling_defaults_are_low_temperature() {
        let params = SamplingParams::default();
        assert!(params.temperature <= 0.2);
        assert_eq!(params.max_tokens, 1024);
    }

    #[test]
    fn test_generation_limit() {
        assert!(can_generate_more(2000, 2000, 512));
        assert!(!can_generate_more(2000, 2512, 512));
    }

    #[test]
    fn test_load_missing_model() {
        let err = LoadedModel::load(Path::new("/nonexistent/model.gguf"))
            .err()
            .unwrap();
        assert!(matches!(err, InferenceError::NotFound(_)));
    }

    #[test]
    fn test_is_degenerate_long_char_run() {
        let response = "The hash is ".to_string() + &"A".repeat(50);
        assert!(is_degenerate_response(&response));
    }

    #[test]
    fn test_is_degenerate_repeating_pattern() {
        assert!(is_degenerate_response(&"@ ".repeat(20)));
    }

    #[test]
    fn test_is_degenerate_repeating_words() {
        assert!(is_degenerate_response(&"sudo ".repeat(10)));
    }

    #[test]
    fn test_is_degenerate_phrase_loop() {
        assert!(is_degenerate_response(&"Fix: Fix: ".repeat(20)));
    }

    #[test]
    fn test_is_not_degenerate_normal_response() {
        let response = "🔍 Root Cause: The file is owned by root.\n\
            🛠️ Fix: `sudo chown $USER notes.txt`\n\
            📚 Technical Explanation: Writing requires write permission on the file.";
        assert!(!is_degenerate_response(response));
    }

    #[test]
    fn test_is_not_degenerate_table_rule() {
        let response = format!("Results\n{}\nls -la shows the owner", "-".repeat(40));
        assert!(!is_degenerate_response(&response));
    }

    #[test]
    fn test_is_not_degenerate_short_or_empty() {
        assert!(!is_degenerate_response("OK"));
        assert!(!is_degenerate_response("   "));
    }
}

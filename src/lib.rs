//! shellsage - terminal assistant backed by local or hosted LLMs
//!
//! This library provides the core functionality for the `shellsage` CLI:
//! failure context collection, prompt construction, backend dispatch,
//! response normalization and parsing, and terminal rendering.

pub mod cli;
pub mod config;
pub mod context;
pub mod hooks;
pub mod interceptor;
pub mod model;
pub mod normalize;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod prompt;
pub mod providers;

// Re-export commonly used types
pub use cli::Cli;
pub use config::Config;
pub use context::{DiagnosticContext, EnvironmentFacts};
pub use model::{ModelFamily, SamplingParams};
pub use normalize::{normalize, Normalized};
pub use parser::{parse_command_plan, parse_solution, CommandPlan, ParsedSolution};
pub use pipeline::{Assistant, Diagnosis, Generation};
pub use providers::{Backend, BackendError, BackendErrorKind, BackendKind, HostedProvider};

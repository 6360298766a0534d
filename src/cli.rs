//! Command-line interface definitions for `shellsage`.

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use crate::config::{LocalEngine, Mode};
use crate::providers::HostedProvider;

/// Terminal assistant: diagnose failing commands and generate new ones
#[derive(Parser, Debug)]
#[command(
    name = "shellsage",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("SHELLSAGE_GIT_SHA"), ")"),
    about,
    long_about = None
)]
#[command(
    after_help = "EXAMPLES:\n    shellsage run cat missing.txt\n    shellsage ask \"find files larger than 1GB\"\n    shellsage config --mode api --provider groq\n    shellsage hook install zsh"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,

    /// Output as JSON
    #[arg(long, short = 'j', global = true)]
    pub json: bool,

    /// Show debug info (context, raw model response, reasoning)
    #[arg(long, short = 'd', global = true)]
    pub debug: bool,

    /// Show the model's reasoning when it emits any
    #[arg(long, global = true)]
    pub show_thinking: bool,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Execute a command and analyze it if it fails
    Run(RunArgs),

    /// Generate shell commands for a request
    Ask(AskArgs),

    /// Show or change the configuration
    Config(ConfigArgs),

    /// List models available to the local backend
    Models,

    /// Manage the shell hook that analyzes failures automatically
    #[command(subcommand)]
    Hook(HookCommand),

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Analyze a command that already failed instead of running it (used by the shell hook)
    #[arg(long, hide = true)]
    pub analyze: bool,

    /// Exit code of the failed command (with --analyze)
    #[arg(long, value_name = "CODE", requires = "analyze")]
    pub exit_code: Option<i32>,

    /// Command to run
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct AskArgs {
    /// Run the generated commands after confirmation
    #[arg(long, short = 'x')]
    pub execute: bool,

    /// What you want to do
    #[arg(trailing_var_arg = true, required = true)]
    pub query: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Switch between local inference and a hosted API
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Local engine (ollama or llama-cpp)
    #[arg(long, value_enum)]
    pub engine: Option<LocalEngine>,

    /// Hosted API provider
    #[arg(long, value_enum)]
    pub provider: Option<HostedProvider>,

    /// Model for the active mode (Ollama tag, GGUF path, or API model id)
    #[arg(long)]
    pub model: Option<String>,

    /// Print the default configuration file and exit
    #[arg(long)]
    pub default: bool,
}

#[derive(Subcommand, Debug)]
pub enum HookCommand {
    /// Print the hook script
    Print {
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Install the hook into the shell's config file
    Install {
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Remove the hook from the shell's config file
    Uninstall {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl RunArgs {
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

impl AskArgs {
    pub fn query_text(&self) -> String {
        self.query.join(" ")
    }
}

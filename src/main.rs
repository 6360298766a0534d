use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use colored::Colorize;
use std::io;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use shellsage::cli::{AskArgs, Cli, CliCommand, ConfigArgs, HookCommand, RunArgs};
use shellsage::config::{generate_default_config, Config, LocalEngine, Mode};
use shellsage::context::EnvironmentFacts;
use shellsage::hooks;
use shellsage::interceptor::{self, Interceptor};
use shellsage::model::{backend_mode, configure_runtime_logs, detect_model_family};
use shellsage::output::{self, format_error, RenderOptions};
use shellsage::pipeline::Assistant;
use shellsage::providers::{
    get_api_key_env_var, list_providers, BackendErrorKind, Generate, OllamaBackend,
};

/// Initialize tracing on stderr. `SHELLSAGE_LOG` wins over the debug switch.
fn init_logging(debug: bool) {
    let default = if debug { "shellsage=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_env("SHELLSAGE_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
    configure_runtime_logs(debug);
}

fn debug_requested(cli: &Cli) -> bool {
    cli.debug
        || std::env::var("SHELLSAGE_DEBUG")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
}

fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "shellsage", &mut io::stdout());
}

/// Build the assistant, turning a missing credential into an actionable error
fn build_assistant(config: &Config) -> Result<Assistant> {
    Assistant::from_config(config).map_err(|err| {
        let tip = match err.kind {
            BackendErrorKind::AuthenticationMissing => Some(format!(
                "export {}=<key> or run: shellsage config --mode local",
                get_api_key_env_var(config.api.provider)
            )),
            _ => None,
        };
        anyhow::anyhow!(format_error(&err.to_string(), tip.as_deref()))
    })
}

async fn run_command(args: RunArgs, config: &Config, options: RenderOptions) -> Result<i32> {
    let assistant = build_assistant(config)?;
    let interceptor = Interceptor::new(assistant, config.context.clone(), options)?;
    let command = args.command_line();

    if args.analyze {
        interceptor
            .analyze(&command, args.exit_code.unwrap_or(1))
            .await?;
        return Ok(0);
    }
    interceptor.run(&command).await
}

async fn ask(args: AskArgs, config: &Config, options: RenderOptions) -> Result<i32> {
    let assistant = build_assistant(config)?;
    let facts = EnvironmentFacts::detect(config.context.history_capacity);
    let generation = assistant
        .generate_commands(&args.query_text(), &facts)
        .await;

    if options.json {
        output::print_json(&generation)?;
        return Ok(0);
    }
    output::print_generation(&generation, &options);

    let Some(command) = generation.plan.command() else {
        return Ok(1);
    };
    if args.execute && output::confirm("🚀 Execute this command?")? {
        interceptor::ignore_interrupts();
        return interceptor::run_interactive(&command);
    }
    Ok(0)
}

fn show_config(config: &Config) {
    println!("{}", "Configuration".bold());
    println!();
    println!("  {} {}", "Mode:".blue().bold(), config.mode);
    match config.mode {
        Mode::Local => {
            println!("  {} {}", "Engine:".blue().bold(), config.local.engine);
            println!("  {} {}", "Model:".blue().bold(), config.local.model);
            if config.local.engine == LocalEngine::Ollama {
                println!("  {} {}", "URL:".blue().bold(), config.local.url);
            }
        }
        Mode::Api => {
            println!("  {} {}", "Provider:".blue().bold(), config.api.provider);
            println!("  {} {}", "Model:".blue().bold(), config.api.model);
            let key = if config.api_key().is_some() {
                "set".green()
            } else {
                format!("missing ({})", get_api_key_env_var(config.api.provider)).red()
            };
            println!("  {} {}", "API key:".blue().bold(), key);
        }
    }
    if let Some(path) = Config::config_path() {
        println!("  {} {}", "File:".blue().bold(), path.display().to_string().dimmed());
    }
    println!();
}

fn configure(args: ConfigArgs) -> Result<i32> {
    if args.default {
        print!("{}", generate_default_config());
        return Ok(0);
    }

    let changed = args.mode.is_some()
        || args.engine.is_some()
        || args.provider.is_some()
        || args.model.is_some();
    if !changed {
        show_config(&Config::load());
        return Ok(0);
    }

    let path = Config::config_path()
        .context("Could not determine the configuration directory")?;
    let config = Config::edit_at(&path, |config| {
        if let Some(mode) = args.mode {
            config.mode = mode;
        }
        if let Some(engine) = args.engine {
            config.local.engine = engine;
        }
        if let Some(provider) = args.provider {
            config.set_provider(provider);
        }
        if let Some(ref model) = args.model {
            config.set_active_model(model);
        }
    })
    .context("Failed to save configuration")?;

    println!("{} Switched to {} mode", "✓".green(), config.mode);
    println!("  {} {}", "Model:".blue().bold(), config.active_model());
    println!("  {} {}", "Saved to:".blue().bold(), path.display());
    Ok(0)
}

async fn list_models(config: &Config) -> Result<i32> {
    match config.local.engine {
        LocalEngine::Ollama => {
            let backend = OllamaBackend::new(
                &config.local.url,
                &config.local.model,
                config.generation.effective_temperature(),
                Vec::new(),
                std::time::Duration::from_secs(config.generation.timeout_secs.max(1)),
            )?;
            let models = backend.list_models().await?;
            println!("{} ({})", "Installed Ollama models".bold(), config.local.url);
            for model in models {
                let marker = if model == config.local.model { "*" } else { "-" };
                println!("  {} {}", marker.green(), model);
            }
            println!();
            println!("  {} {}", "Backend:".blue().bold(), backend.name());
        }
        LocalEngine::LlamaCpp => {
            let path = std::path::Path::new(&config.local.model);
            let status = if path.exists() {
                "found".green()
            } else {
                "missing".red()
            };
            println!("{}", "Local GGUF model".bold());
            println!("  {} ({})", config.local.model, status);
            println!(
                "  {} {}",
                "Template:".blue().bold(),
                config
                    .local
                    .template
                    .unwrap_or_else(|| detect_model_family(path))
            );
            println!("  {} {}", "Runtime:".blue().bold(), backend_mode());
        }
    }

    println!();
    println!("{}", "Hosted providers".bold());
    for (provider, has_key) in list_providers() {
        let status = if has_key {
            "key set".green()
        } else {
            "no key".dimmed()
        };
        println!(
            "  {:<12} {} ({})",
            provider.to_string(),
            provider.default_model(),
            status
        );
    }
    Ok(0)
}

fn manage_hook(command: HookCommand) -> Result<i32> {
    match command {
        HookCommand::Print { shell } => {
            let block = hooks::generate_hook_with_markers(shell)
                .with_context(|| format!("No hook available for {}", shell))?;
            print!("{block}");
        }
        HookCommand::Install { shell } => {
            let path = hooks::config_path_for(shell)?;
            if hooks::install_into(&path, shell)? {
                println!("{} Hook installed in {}", "✓".green(), path.display());
                println!("  Open a new terminal or source the file to activate it.");
            } else {
                println!("{} Hook already installed in {}", "✓".green(), path.display());
            }
        }
        HookCommand::Uninstall { shell } => {
            let path = hooks::config_path_for(shell)?;
            if hooks::remove_from(&path)? {
                println!("{} Hook removed from {}", "✓".green(), path.display());
            } else {
                println!("{} No hook found in {}", "?".yellow(), path.display());
            }
        }
    }
    Ok(0)
}

async fn dispatch(cli: Cli, options: RenderOptions) -> Result<i32> {
    match cli.command {
        CliCommand::Run(args) => run_command(args, &Config::load(), options).await,
        CliCommand::Ask(args) => ask(args, &Config::load(), options).await,
        CliCommand::Config(args) => configure(args),
        CliCommand::Models => list_models(&Config::load()).await,
        CliCommand::Hook(command) => manage_hook(command),
        CliCommand::Completions { shell } => {
            print_completions(shell);
            Ok(0)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let debug = debug_requested(&cli);
    init_logging(debug);

    let options = RenderOptions {
        json: cli.json,
        debug,
        show_thinking: cli.show_thinking,
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            let message = format!("Failed to start runtime: {err}");
            eprintln!("{}", format_error(&message, None));
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(dispatch(cli, options)) {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

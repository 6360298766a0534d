//! Error interception: run shell commands, capture failures, offer fixes.

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::io::{self, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use tracing::{debug, warn};

use crate::config::ContextConfig;
use crate::context::{combine_output, ContextCollector, DiagnosticContext};
use crate::output::{self, RenderOptions};
use crate::pipeline::{Assistant, Diagnosis};

/// Exit status and captured stderr of a command
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub stderr: String,
}

/// JSON shape of `run` results
#[derive(Debug, Serialize)]
struct AnalysisReport<'a> {
    context: &'a DiagnosticContext,
    diagnosis: &'a Diagnosis,
}

/// The user's shell, falling back to `sh`
pub fn user_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "sh".to_string())
}

fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new(user_shell());
    cmd.arg("-c").arg(command);
    cmd
}

/// Exit code of a finished process; signals map to 128 + signal number
pub fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

/// Let Ctrl+C reach the child while the parent keeps running
pub fn ignore_interrupts() {
    if let Err(err) = ctrlc::set_handler(|| {}) {
        debug!(%err, "interrupt handler already installed");
    }
}

/// Run a command with live output, copying its stderr to the terminal and a buffer
pub fn run_teed(command: &str) -> Result<CommandOutcome> {
    let mut child = shell_command(command)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to start {}", user_shell()))?;

    let mut pipe = child
        .stderr
        .take()
        .context("Failed to capture stderr")?;
    let tee = thread::spawn(move || {
        let mut captured = Vec::new();
        let mut buf = [0u8; 4096];
        let mut terminal = io::stderr();
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let _ = terminal.write_all(&buf[..n]);
                    let _ = terminal.flush();
                    captured.extend_from_slice(&buf[..n]);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        captured
    });

    let status = child.wait().context("Failed to wait for command")?;
    let captured = tee.join().unwrap_or_default();

    Ok(CommandOutcome {
        exit_code: exit_code_of(status),
        stderr: String::from_utf8_lossy(&captured).into_owned(),
    })
}

/// Re-run a command without showing its output.
///
/// The outcome's error text is stderr followed by stdout, since many tools
/// report failures on stdout.
pub fn run_silent(command: &str) -> Result<CommandOutcome> {
    let output = shell_command(command)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("Failed to re-run: {}", command))?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(CommandOutcome {
        exit_code: exit_code_of(output.status),
        stderr: combine_output(stderr.trim(), stdout.trim()),
    })
}

/// Run a command attached to the terminal
pub fn run_interactive(command: &str) -> Result<i32> {
    let status = shell_command(command)
        .status()
        .with_context(|| format!("Failed to run: {}", command))?;
    Ok(exit_code_of(status))
}

/// Runs commands and diagnoses their failures
pub struct Interceptor {
    assistant: Assistant,
    collector: ContextCollector,
    settings: ContextConfig,
    options: RenderOptions,
}

impl Interceptor {
    pub fn new(
        assistant: Assistant,
        settings: ContextConfig,
        options: RenderOptions,
    ) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to read the working directory")?;
        Ok(Self {
            assistant,
            collector: ContextCollector::new(settings.clone(), cwd),
            settings,
            options,
        })
    }

    /// Run a command; on failure diagnose it. Returns the command's exit code.
    pub async fn run(&self, command: &str) -> Result<i32> {
        ignore_interrupts();
        debug!(command, shell = %user_shell(), "running command");

        let outcome = run_teed(command)?;
        if outcome.exit_code != 0 {
            self.handle_failure(command, outcome.exit_code, &outcome.stderr)
                .await?;
        }
        Ok(outcome.exit_code)
    }

    /// Diagnose a command that already failed in the user's shell (hook mode)
    pub async fn analyze(&self, command: &str, exit_code: i32) -> Result<()> {
        let stderr = if self.settings.rerun_on_analyze {
            match run_silent(command) {
                Ok(outcome) => outcome.stderr,
                Err(err) => {
                    warn!(%err, "could not re-run the failed command");
                    String::new()
                }
            }
        } else {
            String::new()
        };
        self.handle_failure(command, exit_code, &stderr).await
    }

    async fn handle_failure(&self, command: &str, exit_code: i32, output: &str) -> Result<()> {
        let context = self.collector.collect(command, exit_code, output);

        if self.options.debug {
            output::print_debug_section("Error Context", &context.format_for_prompt(), None);
        }
        if !self.options.json {
            eprintln!("\n{}", "🔎 Analyzing error...".dimmed());
        }

        let diagnosis = self.assistant.diagnose(&context).await;

        if self.options.json {
            return output::print_json(&AnalysisReport {
                context: &context,
                diagnosis: &diagnosis,
            });
        }

        output::print_diagnosis(&diagnosis, &context, &self.options);

        if let Some(ref fix) = diagnosis.solution.fix {
            let fix = output::resolve_placeholders(fix, &context.relevant_files);
            if output::confirm(&format!("🚀 Run fix command: '{}'?", fix))? {
                let code = run_interactive(&fix)?;
                if code != 0 {
                    eprintln!("{}", format!("Fix exited with code {}", code).yellow());
                }
            }
        }
        Ok(())
    }
}

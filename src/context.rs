//! Diagnostic context for failed shell commands.
//!
//! This module gathers everything a backend needs to diagnose a failure: the
//! command, its sanitized output, where it ran, what ran before it, and a few
//! best-effort enrichments (man page, git and docker state).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use tracing::debug;

use crate::config::ContextConfig;

/// Marker inserted where oversized error output was cut.
pub const TRUNCATION_MARKER: &str = "\n[...truncated...]\n";

/// Commands whose last argument is usually a file worth mentioning.
const FILE_COMMANDS: &[&str] = &["touch", "mkdir", "cp", "mv", "vim", "nano", "cat", "code"];

/// Sections kept from a man page.
const MAN_SECTIONS: &[&str] = &["NAME", "SYNOPSIS", "DESCRIPTION"];

/// Maximum number of man page lines included.
const MAN_EXCERPT_LINES: usize = 10;

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1B\[[0-?]*[ -/]*[@-~]").expect("valid regex"));

static OVERSTRIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".\x08").expect("valid regex"));

static ZSH_EXTENDED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^: \d+:\d+;").expect("valid regex"));

/// Everything sent to a backend about one failed command.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiagnosticContext {
    /// The command that failed
    pub command: String,

    /// Combined stderr/stdout, ANSI-stripped and bounded
    pub error_output: String,

    /// Working directory where the command ran
    pub working_dir: String,

    /// Exit code of the command
    pub exit_code: i32,

    /// Prior commands, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<String>,

    /// Recently touched files, most recent first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relevant_files: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub man_excerpt: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_status: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_remotes: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_state: Option<String>,
}

impl DiagnosticContext {
    /// Create context with just a command and exit code
    pub fn new(command: impl Into<String>, exit_code: i32) -> Self {
        Self {
            command: command.into(),
            exit_code,
            ..Default::default()
        }
    }

    /// Builder: set raw error output, sanitized with the default bounds
    pub fn error_output(self, output: &str) -> Self {
        let defaults = ContextConfig::default();
        self.error_output_bounded(output, defaults.error_head_chars, defaults.error_tail_chars)
    }

    /// Builder: set raw error output, keeping `head` leading and `tail`
    /// trailing characters when it is oversized
    pub fn error_output_bounded(mut self, output: &str, head: usize, tail: usize) -> Self {
        self.error_output = sanitize_error_output(output, head, tail);
        self
    }

    /// Builder: set working directory
    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Builder: set prior commands
    pub fn history(mut self, history: Vec<String>) -> Self {
        self.history = history;
        self
    }

    /// Builder: set recently used files
    pub fn relevant_files(mut self, files: Vec<String>) -> Self {
        self.relevant_files = files;
        self
    }

    /// Builder: set man page excerpt
    pub fn man_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.man_excerpt = non_empty(excerpt.into());
        self
    }

    /// Builder: set git status snippet
    pub fn git_status(mut self, status: impl Into<String>) -> Self {
        self.git_status = non_empty(status.into());
        self
    }

    /// Builder: set docker state snippet
    pub fn docker_state(mut self, state: impl Into<String>) -> Self {
        self.docker_state = non_empty(state.into());
        self
    }

    /// First word of the command, if any
    pub fn base_command(&self) -> Option<&str> {
        self.command.split_whitespace().next()
    }

    /// Format context for inclusion in a prompt
    pub fn format_for_prompt(&self) -> String {
        let mut parts = vec![
            format!("Failed Command: {}", self.command),
            format!(
                "Exit Code: {} ({})",
                self.exit_code,
                interpret_exit_code(self.exit_code)
            ),
            format!("Working Directory: {}", self.working_dir),
        ];

        if self.error_output.trim().is_empty() {
            parts.push("Error Message: (no output captured)".to_string());
        } else {
            parts.push(format!("Error Message:\n{}", self.error_output));
        }

        if !self.history.is_empty() {
            let history = self
                .history
                .iter()
                .enumerate()
                .map(|(i, cmd)| format!("  {}. {}", i + 1, cmd))
                .collect::<Vec<_>>()
                .join("\n");
            parts.push(format!("Recent Commands:\n{}", history));
        }

        if !self.relevant_files.is_empty() {
            parts.push(format!(
                "Recently Used Files: {}",
                self.relevant_files.join(", ")
            ));
        }

        if let Some(ref status) = self.git_status {
            parts.push(format!("Git Status:\n{}", status));
        }

        if let Some(ref remotes) = self.git_remotes {
            parts.push(format!("Git Remotes:\n{}", remotes));
        }

        if let Some(ref state) = self.docker_state {
            parts.push(format!("Docker State:\n{}", state));
        }

        if let Some(ref excerpt) = self.man_excerpt {
            parts.push(format!("Manual Excerpt:\n{}", excerpt));
        }

        parts.join("\n")
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Fixed-capacity command history; the oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct CommandHistory {
    entries: VecDeque<String>,
    capacity: usize,
}

impl CommandHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, command: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        let command = command.into();
        if command.trim().is_empty() {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(command);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries, oldest first
    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    /// Load the tail of the user's shell history file.
    pub fn from_shell_history(capacity: usize) -> Self {
        let mut history = Self::new(capacity);
        let Some(path) = shell_history_path() else {
            return history;
        };
        match std::fs::read(&path) {
            Ok(bytes) => {
                for line in String::from_utf8_lossy(&bytes).lines() {
                    let line = ZSH_EXTENDED.replace(line, "");
                    history.push(line.trim());
                }
            }
            Err(err) => debug!(path = %path.display(), %err, "shell history unavailable"),
        }
        history
    }

    /// Files referenced by recent file-manipulating commands, most recent
    /// first, skipping the newest entry (the failing command itself).
    pub fn relevant_files(&self, limit: usize) -> Vec<String> {
        self.entries
            .iter()
            .rev()
            .skip(1)
            .filter_map(|cmd| {
                let parts: Vec<&str> = cmd.split_whitespace().collect();
                match parts.as_slice() {
                    [first, .., last] if FILE_COMMANDS.contains(first) => {
                        Some(last.to_string())
                    }
                    _ => None,
                }
            })
            .take(limit)
            .collect()
    }
}

fn shell_history_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("HISTFILE") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }
    let home = dirs::home_dir()?;
    [".zsh_history", ".bash_history"]
        .iter()
        .map(|name| home.join(name))
        .find(|path| path.exists())
}

/// Remove ANSI escape sequences
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Keep the first `head` and last `tail` characters of oversized text,
/// joined by [`TRUNCATION_MARKER`].
pub fn truncate_middle(text: &str, head: usize, tail: usize) -> String {
    let total = text.chars().count();
    if total <= head + tail {
        return text.to_string();
    }
    let start: String = text.chars().take(head).collect();
    let end: String = text.chars().skip(total - tail).collect();
    format!("{start}{TRUNCATION_MARKER}{end}")
}

/// ANSI-strip, trim and bound raw command output.
pub fn sanitize_error_output(raw: &str, head: usize, tail: usize) -> String {
    truncate_middle(strip_ansi(raw).trim(), head, tail)
}

/// Join stderr and stdout the way they are sent to the backend.
pub fn combine_output(stderr: &str, stdout: &str) -> String {
    match (stderr.trim().is_empty(), stdout.trim().is_empty()) {
        (false, false) => format!("{stderr}\n{stdout}"),
        (false, true) => stderr.to_string(),
        (true, false) => stdout.to_string(),
        (true, true) => String::new(),
    }
}

/// Interpret common exit codes
pub fn interpret_exit_code(code: i32) -> &'static str {
    match code {
        0 => "success",
        1 => "general error",
        2 => "misuse of shell command",
        126 => "permission problem or command not executable",
        127 => "command not found",
        128 => "invalid exit argument",
        130 => "terminated by Ctrl+C (SIGINT)",
        137 => "killed (SIGKILL)",
        139 => "segmentation fault (SIGSEGV)",
        141 => "broken pipe (SIGPIPE)",
        143 => "terminated (SIGTERM)",
        255 => "exit status out of range",
        _ if code > 128 && code < 256 => "terminated by signal",
        _ => "unknown",
    }
}

/// Extract NAME/SYNOPSIS/DESCRIPTION lines from rendered man page text.
pub fn extract_man_sections(page: &str) -> String {
    let page = OVERSTRIKE.replace_all(page, "");
    let mut lines = Vec::new();
    let mut in_section = false;

    for line in page.lines() {
        let heading = line.trim_end();
        if !heading.is_empty() && !heading.starts_with(char::is_whitespace) {
            in_section = MAN_SECTIONS.contains(&heading.to_uppercase().as_str());
            if in_section {
                lines.push(heading.to_string());
            }
        } else if in_section && !line.trim().is_empty() {
            lines.push(line.trim().to_string());
        }
        if lines.len() >= MAN_EXCERPT_LINES {
            break;
        }
    }

    lines.join("\n")
}

/// Run a helper command and return its trimmed stdout on success.
fn capture(program: &str, args: &[&str], cwd: &Path) -> Option<String> {
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .env("MANPAGER", "cat")
        .env("MANWIDTH", "100")
        .output()
        .ok()?;
    if !output.status.success() {
        debug!(program, status = ?output.status, "context helper failed");
        return None;
    }
    non_empty(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Best-effort collection of enrichment fields.
#[derive(Debug, Clone)]
pub struct ContextCollector {
    settings: ContextConfig,
    cwd: PathBuf,
}

impl ContextCollector {
    pub fn new(settings: ContextConfig, cwd: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            cwd: cwd.into(),
        }
    }

    /// Build the full context for a failed command.
    pub fn collect(&self, command: &str, exit_code: i32, raw_output: &str) -> DiagnosticContext {
        let mut history = CommandHistory::from_shell_history(self.settings.history_capacity);
        if history.entries().last().map(String::as_str) != Some(command) {
            history.push(command);
        }

        let mut ctx = DiagnosticContext::new(command, exit_code)
            .error_output_bounded(
                raw_output,
                self.settings.error_head_chars,
                self.settings.error_tail_chars,
            )
            .working_dir(self.cwd.display().to_string())
            .relevant_files(history.relevant_files(self.settings.max_relevant_files))
            .history(history.entries());

        let base = ctx.base_command().map(str::to_string);
        if let Some(base) = base {
            if self.settings.man_page {
                if let Some(page) = capture("man", &[base.as_str()], &self.cwd) {
                    ctx = ctx.man_excerpt(extract_man_sections(&page));
                }
            }
            match base.as_str() {
                "git" => {
                    if let Some(status) = capture("git", &["status", "--porcelain"], &self.cwd) {
                        ctx = ctx.git_status(status);
                    }
                    ctx.git_remotes = capture("git", &["remote", "-v"], &self.cwd);
                }
                "docker" => {
                    if let Some(state) = capture(
                        "docker",
                        &["ps", "--format", "{{.Names}}\t{{.Status}}\t{{.Image}}"],
                        &self.cwd,
                    ) {
                        ctx = ctx.docker_state(state);
                    }
                }
                _ => {}
            }
        }

        ctx
    }
}

/// Environment facts for the command-generation flow.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnvironmentFacts {
    pub os: String,
    pub cwd: String,
    pub git: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<String>,
}

impl EnvironmentFacts {
    pub fn detect(history_capacity: usize) -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        Self {
            os: std::env::consts::OS.to_string(),
            git: cwd.join(".git").exists(),
            cwd: cwd.display().to_string(),
            history: CommandHistory::from_shell_history(history_capacity).entries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_new() {
        let ctx = DiagnosticContext::new("ls -la", 2);
        assert_eq!(ctx.command, "ls -la");
        assert_eq!(ctx.exit_code, 2);
        assert!(ctx.history.is_empty());
        assert!(ctx.man_excerpt.is_none());
    }

    #[test]
    fn test_context_builder() {
        let ctx = DiagnosticContext::new("cargo build", 101)
            .error_output("\x1b[31merror[E0382]\x1b[0m: borrow of moved value")
            .working_dir("/home/user/project")
            .history(vec!["cd project".to_string(), "cargo build".to_string()])
            .git_status("  ");

        assert_eq!(ctx.error_output, "error[E0382]: borrow of moved value");
        assert_eq!(ctx.working_dir, "/home/user/project");
        assert_eq!(ctx.history.len(), 2);
        assert!(ctx.git_status.is_none());
    }

    #[test]
    fn test_format_for_prompt() {
        let ctx = DiagnosticContext::new("whoam", 127)
            .error_output("bash: whoam: command not found")
            .working_dir("/tmp")
            .history(vec!["ls".to_string()])
            .relevant_files(vec!["notes.txt".to_string()]);

        let prompt = ctx.format_for_prompt();
        assert!(prompt.contains("Failed Command: whoam"));
        assert!(prompt.contains("Exit Code: 127 (command not found)"));
        assert!(prompt.contains("Working Directory: /tmp"));
        assert!(prompt.contains("bash: whoam: command not found"));
        assert!(prompt.contains("1. ls"));
        assert!(prompt.contains("notes.txt"));
        assert!(!prompt.contains("Git Status"));
    }

    #[test]
    fn test_truncate_keeps_head_and_tail() {
        let text = format!("{}{}{}", "a".repeat(600), "b".repeat(600), "c".repeat(600));
        let truncated = truncate_middle(&text, 500, 500);

        assert!(truncated.len() <= 1000 + TRUNCATION_MARKER.len());
        assert!(truncated.starts_with(&"a".repeat(500)));
        assert!(truncated.ends_with(&"c".repeat(500)));
        assert!(truncated.contains(TRUNCATION_MARKER));
    }

    #[test]
    fn test_truncate_short_text_untouched() {
        assert_eq!(truncate_middle("short", 500, 500), "short");
        let exact = "x".repeat(1000);
        assert_eq!(truncate_middle(&exact, 500, 500), exact);
    }

    #[test]
    fn test_truncate_multibyte() {
        let text = "é".repeat(30);
        let truncated = truncate_middle(&text, 5, 5);
        assert_eq!(truncated, format!("{}{}{}", "é".repeat(5), TRUNCATION_MARKER, "é".repeat(5)));
    }

    #[test]
    fn test_truncate_custom_bounds() {
        let text = "0123456789".repeat(10);
        let truncated = truncate_middle(&text, 3, 2);
        assert_eq!(truncated, format!("012{TRUNCATION_MARKER}89"));
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[1;31mfatal\x1b[0m: x"), "fatal: x");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn test_combine_output() {
        assert_eq!(combine_output("err", "out"), "err\nout");
        assert_eq!(combine_output("err", ""), "err");
        assert_eq!(combine_output("  ", "out"), "out");
        assert_eq!(combine_output("", ""), "");
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = CommandHistory::new(3);
        for cmd in ["a", "b", "c", "d"] {
            history.push(cmd);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.entries(), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_history_zero_capacity() {
        let mut history = CommandHistory::new(0);
        history.push("ls");
        assert!(history.is_empty());
    }

    #[test]
    fn test_history_skips_blank() {
        let mut history = CommandHistory::new(10);
        history.push("   ");
        assert!(history.is_empty());
    }

    #[test]
    fn test_relevant_files_most_recent_first() {
        let mut history = CommandHistory::new(10);
        for cmd in [
            "touch a.txt",
            "vim b.rs",
            "ls",
            "cp x.txt y.txt",
            "mkdir out",
            "cat missing.txt",
        ] {
            history.push(cmd);
        }
        assert_eq!(history.relevant_files(3), vec!["out", "y.txt", "b.rs"]);
    }

    #[test]
    fn test_extract_man_sections() {
        let page = "LS(1)      User Commands     LS(1)\n\nNAME\n       ls - list directory contents\n\nSYNOPSIS\n       ls [OPTION]... [FILE]...\n\nAUTHOR\n       Written by someone.";
        let excerpt = extract_man_sections(page);
        assert!(excerpt.contains("NAME"));
        assert!(excerpt.contains("ls - list directory contents"));
        assert!(excerpt.contains("ls [OPTION]... [FILE]..."));
        assert!(!excerpt.contains("Written by"));
    }

    #[test]
    fn test_extract_man_sections_overstrike() {
        let page = "N\x08NA\x08AM\x08ME\x08E\n       echo - display a line";
        let excerpt = extract_man_sections(page);
        assert!(excerpt.starts_with("NAME"));
        assert!(excerpt.contains("echo - display a line"));
    }

    #[test]
    fn test_extract_man_sections_bounded() {
        let body = (0..50)
            .map(|i| format!("       line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let excerpt = extract_man_sections(&format!("DESCRIPTION\n{body}"));
        assert_eq!(excerpt.lines().count(), MAN_EXCERPT_LINES);
    }

    #[test]
    fn test_interpret_exit_code() {
        assert_eq!(interpret_exit_code(0), "success");
        assert_eq!(interpret_exit_code(1), "general error");
        assert_eq!(interpret_exit_code(127), "command not found");
        assert_eq!(interpret_exit_code(130), "terminated by Ctrl+C (SIGINT)");
        assert_eq!(interpret_exit_code(139), "segmentation fault (SIGSEGV)");
        assert_eq!(interpret_exit_code(42), "unknown");
    }

    #[test]
    fn test_base_command() {
        assert_eq!(DiagnosticContext::new("git push", 1).base_command(), Some("git"));
        assert_eq!(DiagnosticContext::new("", 1).base_command(), None);
    }
}

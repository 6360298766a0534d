//! Structured extraction of model answers.
//!
//! Each field has an ordered list of extraction rules. A rule is a pure
//! function from canonical text to an optional value; the first rule that
//! yields a value wins. Missing fields are a normal outcome and are
//! represented as `None`, never as an error.
//!
//! The keyword fallback for commands is a best-effort heuristic for answers
//! that ignore the requested format. It only recognises lines that *start*
//! with a package-manager or privilege-escalation keyword and takes the rest
//! of the line, so a wrong match is possible but prose mentioning a tool is
//! not picked up.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::normalize::{
    self, ANALYSIS, COMMAND, DETAILS, EXPLANATION, FIX, MARKERS, PREVENTION, RISKS, ROOT_CAUSE,
    WARNING,
};

/// An extraction rule: canonical text in, field value out.
pub type Rule = fn(&str) -> Option<String>;

static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\n]+)`").expect("valid regex"));

static CODE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:[\w+-]*[ \t]*\n)?(.*?)(?:```|\z)").expect("valid regex")
});

static KEYWORD_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^((?:sudo|apt-get|apt|dnf|yum|brew|pacman|snap|pip3|pip|npm|cargo)[ \t]+\S.*)$",
    )
    .expect("valid regex")
});

/// Structured diagnosis of a failed command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedSolution {
    pub cause: Option<String>,
    /// The only field that leads to a follow-up action
    pub fix: Option<String>,
    pub explanation: Option<String>,
    pub risk: Option<String>,
    pub prevention: Option<String>,
}

impl ParsedSolution {
    /// Parse canonical (already normalized) text.
    pub fn from_normalized(text: &str) -> Self {
        Self {
            cause: first_match(text, CAUSE_RULES),
            fix: first_match(text, FIX_RULES),
            explanation: first_match(text, EXPLANATION_RULES),
            risk: first_match(text, RISK_RULES),
            prevention: first_match(text, PREVENTION_RULES),
        }
    }

    /// Record returned when no answer could be obtained at all.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            risk: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cause.is_none()
            && self.fix.is_none()
            && self.explanation.is_none()
            && self.risk.is_none()
            && self.prevention.is_none()
    }
}

/// One command of a generated sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStep {
    pub command: String,
    pub explanation: Option<String>,
}

/// Structured answer of the command-generation flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPlan {
    pub analysis: Option<String>,
    pub warning: Option<String>,
    /// Commands in execution order; empty when no command was found
    pub steps: Vec<CommandStep>,
    pub details: Option<String>,
}

impl CommandPlan {
    pub fn from_normalized(text: &str) -> Self {
        let steps = first_match(text, COMMAND_RULES)
            .map(|block| split_steps(&block))
            .unwrap_or_default();

        Self {
            analysis: first_match(text, ANALYSIS_RULES),
            warning: first_match(text, WARNING_RULES),
            steps,
            details: first_match(text, DETAILS_RULES),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            warning: Some(message.into()),
            ..Default::default()
        }
    }

    /// All commands joined by newlines, in order.
    pub fn command(&self) -> Option<String> {
        if self.steps.is_empty() {
            return None;
        }
        Some(
            self.steps
                .iter()
                .map(|step| step.command.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    pub fn commands(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.command.as_str()).collect()
    }
}

/// Normalize and parse a diagnosis answer.
pub fn parse_solution(raw: &str) -> ParsedSolution {
    ParsedSolution::from_normalized(&normalize::normalize_text(raw))
}

/// Normalize and parse a command-generation answer.
pub fn parse_command_plan(raw: &str) -> CommandPlan {
    CommandPlan::from_normalized(&normalize::normalize_text(raw))
}

/// Apply `rules` in order and return the first value produced.
pub fn first_match(text: &str, rules: &[Rule]) -> Option<String> {
    rules.iter().find_map(|rule| rule(text))
}

pub const CAUSE_RULES: &[Rule] = &[cause_section];
pub const FIX_RULES: &[Rule] = &[
    fix_inline_code,
    fix_code_block,
    fix_keyword_in_section,
    keyword_command_anywhere,
];
pub const EXPLANATION_RULES: &[Rule] = &[explanation_section];
pub const RISK_RULES: &[Rule] = &[risks_section, warning_section];
pub const PREVENTION_RULES: &[Rule] = &[prevention_section];

pub const ANALYSIS_RULES: &[Rule] = &[analysis_section];
pub const WARNING_RULES: &[Rule] = &[warning_section];
pub const DETAILS_RULES: &[Rule] = &[details_section];
pub const COMMAND_RULES: &[Rule] = &[
    command_code_block,
    command_inline_code,
    command_keyword_in_section,
    keyword_command_anywhere,
];

/// Text between `marker` and the next known marker (or end of text).
pub fn section<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let start = text.find(marker)? + marker.len();
    let rest = &text[start..];
    let end = MARKERS
        .iter()
        .filter_map(|m| rest.find(m))
        .min()
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

fn text_field(text: &str, marker: &str) -> Option<String> {
    section(text, marker).and_then(clean_text)
}

/// Collapse whitespace; empty values are absent.
fn clean_text(value: &str) -> Option<String> {
    let joined = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

fn cause_section(text: &str) -> Option<String> {
    text_field(text, ROOT_CAUSE)
}

fn explanation_section(text: &str) -> Option<String> {
    text_field(text, EXPLANATION)
}

fn risks_section(text: &str) -> Option<String> {
    text_field(text, RISKS)
}

fn warning_section(text: &str) -> Option<String> {
    text_field(text, WARNING)
}

fn prevention_section(text: &str) -> Option<String> {
    text_field(text, PREVENTION)
}

fn analysis_section(text: &str) -> Option<String> {
    text_field(text, ANALYSIS)
}

fn details_section(text: &str) -> Option<String> {
    text_field(text, DETAILS)
}

fn inline_code(section: &str) -> Option<String> {
    INLINE_CODE
        .captures_iter(section)
        .filter_map(|caps| caps.get(1))
        .find_map(|m| clean_command(m.as_str()))
}

fn code_block(section: &str) -> Option<String> {
    let caps = CODE_BLOCK.captures(section)?;
    let body = caps.get(1)?.as_str();
    let lines = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn fix_inline_code(text: &str) -> Option<String> {
    inline_code(section(text, FIX)?)
}

fn fix_code_block(text: &str) -> Option<String> {
    code_block(section(text, FIX)?)
}

fn fix_keyword_in_section(text: &str) -> Option<String> {
    keyword_command(section(text, FIX)?)
}

fn command_code_block(text: &str) -> Option<String> {
    code_block(section(text, COMMAND)?)
}

fn command_inline_code(text: &str) -> Option<String> {
    inline_code(section(text, COMMAND)?)
}

fn command_keyword_in_section(text: &str) -> Option<String> {
    keyword_command(section(text, COMMAND)?)
}

fn keyword_command_anywhere(text: &str) -> Option<String> {
    keyword_command(text)
}

/// Find the first line that starts with a command keyword.
fn keyword_command(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let mut line = line.trim();
        if let Some(marker) = MARKERS.iter().find(|m| line.starts_with(**m)) {
            line = line[marker.len()..].trim_start();
        }
        let line = line
            .trim_start_matches("$ ")
            .trim_start_matches("- ")
            .trim_start();
        let caps = KEYWORD_COMMAND.captures(line)?;
        let command = caps
            .get(1)?
            .as_str()
            .trim_end_matches(['.', ',', ';', ':']);
        clean_command(command)
    })
}

/// Trim a command and unwrap template brackets (`[whoami]`) and prompt signs.
fn clean_command(command: &str) -> Option<String> {
    let mut command = command.trim();
    if let Some(stripped) = command.strip_prefix("$ ") {
        command = stripped.trim_start();
    }
    if command.len() > 2
        && command.starts_with('[')
        && command.ends_with(']')
        && !command[1..].starts_with(char::is_whitespace)
    {
        command = command[1..command.len() - 1].trim();
    }
    if command.is_empty() {
        None
    } else {
        Some(command.to_string())
    }
}

/// Split a command block into ordered steps.
///
/// A line that is only a `#` comment annotates the command after it; a
/// trailing ` # ...` annotates its own line.
fn split_steps(block: &str) -> Vec<CommandStep> {
    let mut steps = Vec::new();
    let mut pending: Option<String> = None;

    for line in block.lines() {
        let line = line.trim();
        let line = line.strip_prefix("$ ").unwrap_or(line).trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            pending = clean_text(comment);
            continue;
        }

        let (command, inline) = match line.split_once(" # ") {
            Some((command, comment)) => (command.trim(), clean_text(comment)),
            None => (line, None),
        };
        if command.is_empty() {
            continue;
        }
        steps.push(CommandStep {
            command: command.to_string(),
            explanation: inline.or_else(|| pending.take()),
        });
        pending = None;
    }

    steps
}

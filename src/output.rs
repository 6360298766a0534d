//! Terminal output formatting and user confirmation.

use anyhow::{Context, Result};
use colored::{Color, Colorize};
use regex::{Captures, Regex};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::sync::LazyLock;

use crate::context::DiagnosticContext;
use crate::pipeline::{Diagnosis, Generation};

static FILE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<filename>|<file>|filename").expect("valid regex"));

/// How results are presented
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Emit JSON instead of colored text
    pub json: bool,
    /// Dump context, prompt and raw response
    pub debug: bool,
    /// Show extracted reasoning
    pub show_thinking: bool,
}

pub fn format_error(message: &str, tip: Option<&str>) -> String {
    let mut output = format!("{} {}", "Error:".red().bold(), message);
    if let Some(tip) = tip {
        output.push('\n');
        output.push_str(&format!("{} {}", "Tip:".blue().bold(), tip));
    }
    output
}

/// Replace a file placeholder in a suggested fix with the most recent relevant file.
///
/// `<file>` and `<filename>` are replaced anywhere. A bare `filename` is only
/// replaced when it is a whole whitespace-separated word, so `filename.txt`
/// stays as written.
pub fn resolve_placeholders(fix: &str, relevant_files: &[String]) -> String {
    let Some(file) = relevant_files.first() else {
        return fix.to_string();
    };
    FILE_PLACEHOLDER
        .replace_all(fix, |caps: &Captures| match caps.get(0) {
            Some(m) if m.as_str().starts_with('<') || stands_alone(fix, m.range()) => {
                file.clone()
            }
            Some(m) => m.as_str().to_string(),
            None => String::new(),
        })
        .into_owned()
}

fn stands_alone(text: &str, range: std::ops::Range<usize>) -> bool {
    let before = text[..range.start]
        .chars()
        .next_back()
        .map_or(true, char::is_whitespace);
    let after = text[range.end..]
        .chars()
        .next()
        .map_or(true, char::is_whitespace);
    before && after
}

/// Print a labelled field, wrapped to the terminal width; absent fields print nothing
fn print_field(label: &str, value: Option<&str>, color: Color) {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return;
    };
    let width = textwrap::termwidth().min(100);
    println!("{} {}", "▸".bold(), label.color(color).bold());
    for line in textwrap::wrap(value, width.saturating_sub(3)) {
        println!("   {}", line.as_ref().color(color));
    }
}

/// Print a diagnosis with the context it was made from
pub fn print_diagnosis(
    diagnosis: &Diagnosis,
    context: &DiagnosticContext,
    options: &RenderOptions,
) {
    if options.show_thinking || options.debug {
        print_thinking(&diagnosis.thinking);
    }

    println!();
    println!("{}", "=== ERROR ANALYSIS ===".blue().bold());

    let recent: Vec<&String> = context.history.iter().rev().take(3).rev().collect();
    if !recent.is_empty() {
        println!();
        println!("{}", "[Context] Recent Commands:".dimmed());
        for cmd in recent {
            println!("  {}", cmd.dimmed());
        }
    }
    if !context.relevant_files.is_empty() {
        println!();
        println!("{}", "[Context] Recently Used Files:".dimmed());
        for file in &context.relevant_files {
            println!("  {}", file.dimmed());
        }
    }
    println!();

    let solution = &diagnosis.solution;
    print_field("ROOT CAUSE", solution.cause.as_deref(), Color::Red);
    print_field("TECHNICAL DETAILS", solution.explanation.as_deref(), Color::Yellow);
    print_field("POTENTIAL RISKS", solution.risk.as_deref(), Color::Yellow);
    print_field("PREVENTION", solution.prevention.as_deref(), Color::Cyan);

    if let Some(ref excerpt) = context.man_excerpt {
        println!();
        println!("{}", "[Manual Excerpt]".dimmed());
        for line in excerpt.lines() {
            println!("{}", line.dimmed());
        }
    }

    if let Some(ref fix) = solution.fix {
        println!();
        println!("{} {}", "▸".bold(), "FIX".green().bold());
        println!("   {}", fix.green());
    }

    if options.debug {
        if let Some(ref raw) = diagnosis.raw_response {
            print_debug_section("Raw Response", raw, Some(format!("({} chars)", raw.len())));
        }
    }
}

/// Print a generated command plan
pub fn print_generation(generation: &Generation, options: &RenderOptions) {
    if options.show_thinking || options.debug {
        print_thinking(&generation.thinking);
    }

    let plan = &generation.plan;
    println!();
    println!("{}", "=== COMMAND ANALYSIS ===".blue().bold());
    println!();

    print_field("WARNING", plan.warning.as_deref(), Color::Red);
    print_field("ANALYSIS", plan.analysis.as_deref(), Color::Cyan);

    if plan.steps.is_empty() {
        println!();
        println!("{}", "No valid command generated".red());
    } else {
        println!("{} {}", "▸".bold(), "COMMAND".green().bold());
        for step in &plan.steps {
            match step.explanation {
                Some(ref why) => println!(
                    "   {}  {}",
                    step.command.green(),
                    format!("# {why}").dimmed()
                ),
                None => println!("   {}", step.command.green()),
            }
        }
    }
    print_field("DETAILS", plan.details.as_deref(), Color::Blue);

    if options.debug {
        if let Some(ref raw) = generation.raw_response {
            print_debug_section("Raw Response", raw, Some(format!("({} chars)", raw.len())));
        }
    }
}

/// Print extracted reasoning blocks
pub fn print_thinking(thinking: &[String]) {
    for (i, block) in thinking.iter().enumerate() {
        let title = if thinking.len() == 1 {
            "Thinking".to_string()
        } else {
            format!("Thinking {}/{}", i + 1, thinking.len())
        };
        eprintln!("{} {}", "▸".dimmed(), title.magenta().dimmed());
        for line in block.lines() {
            eprintln!("  {}", line.dimmed());
        }
        eprintln!();
    }
}

/// Serialize any result as pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize result")?;
    println!("{json}");
    Ok(())
}

pub fn print_debug_section(title: &str, body: &str, footer: Option<String>) {
    eprintln!("{}", format!("=== DEBUG: {title} ===").yellow().bold());
    if body.trim().is_empty() {
        eprintln!("{}", "| <empty>".dimmed());
    } else {
        for line in body.lines() {
            eprintln!("{}", format!("| {line}").bright_white());
        }
    }
    if let Some(footer) = footer {
        eprintln!("{}", footer.dimmed());
    }
    eprintln!();
}

/// Ask a yes/no question on the terminal; anything but an explicit yes is no
pub fn confirm(question: &str) -> Result<bool> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stderr();
    confirm_with(question, &mut input, &mut output)
}

/// Confirmation against arbitrary streams
pub fn confirm_with<R: BufRead, W: Write>(
    question: &str,
    input: &mut R,
    output: &mut W,
) -> Result<bool> {
    write!(output, "\n{} {} ", question.magenta().bold(), "[y/N]".dimmed())?;
    output.flush()?;

    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    Ok(matches!(
        answer.trim().to_lowercase().as_str(),
        "y" | "yes"
    ))
}

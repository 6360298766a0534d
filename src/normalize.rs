//! Response normalization.
//!
//! Backends return free text with varying amounts of noise: reasoning blocks,
//! numbered lists, bold markup and section labels with or without their
//! decorative glyphs. [`normalize`] turns all of that into a canonical form in
//! which every section starts with exactly one marker from [`MARKERS`], so the
//! parser never has to know which backend produced the text.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

pub const ROOT_CAUSE: &str = "\u{1F50D} Root Cause:";
pub const FIX: &str = "\u{1F6E0}\u{FE0F} Fix:";
pub const EXPLANATION: &str = "\u{1F4DA} Technical Explanation:";
pub const RISKS: &str = "\u{26A0}\u{FE0F} Potential Risks:";
pub const PREVENTION: &str = "\u{1F512} Prevention Tip:";
pub const ANALYSIS: &str = "\u{1F9E0} Analysis:";
pub const COMMAND: &str = "\u{1F6E0}\u{FE0F} Command:";
pub const DETAILS: &str = "\u{1F4DD} Details:";
pub const WARNING: &str = "\u{26A0}\u{FE0F} Warning:";

/// Every canonical section marker, for both response schemas.
pub const MARKERS: &[&str] = &[
    ROOT_CAUSE,
    FIX,
    EXPLANATION,
    RISKS,
    PREVENTION,
    ANALYSIS,
    COMMAND,
    DETAILS,
    WARNING,
];

/// Plain-text labels and the marker each one is rewritten to.
///
/// Longer labels come first so that `Root Cause` wins over `Cause`.
const LABELS: &[(&str, &str)] = &[
    ("root cause", ROOT_CAUSE),
    ("cause", ROOT_CAUSE),
    ("fix command", FIX),
    ("fix", FIX),
    ("solution", FIX),
    ("technical explanation", EXPLANATION),
    ("technical details", EXPLANATION),
    ("explanation", EXPLANATION),
    ("potential risks", RISKS),
    ("potential risk", RISKS),
    ("risks", RISKS),
    ("risk", RISKS),
    ("prevention tip", PREVENTION),
    ("prevention", PREVENTION),
    ("analysis", ANALYSIS),
    ("commands", COMMAND),
    ("command", COMMAND),
    ("details", DETAILS),
    ("warnings", WARNING),
    ("warning", WARNING),
];

/// Opening/closing delimiters used by reasoning models.
const THINK_TAGS: &[&str] = &["think", "thinking", "reasoning"];

static THINK_PAIRS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    THINK_TAGS
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}>(.*?)</{tag}>")).expect("valid think regex")
        })
        .collect()
});

static THINK_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</(?:think|thinking|reasoning)>").expect("valid regex"));

static THINK_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<(?:think|thinking|reasoning)>").expect("valid regex"));

static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:\d+[.)]\s+)+").expect("valid regex"));

static LABEL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    let labels = LABELS
        .iter()
        .map(|(label, _)| label.replace(' ', r"\s+"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(
        r"(?i)^\s*(?:#{{1,6}}\s*)?(?:[-*+\x{{2022}}]\s+)?(?:[^\p{{L}}\p{{N}}\s`]+\s*)?(?P<label>{labels})\s*:[ \t]*(?P<rest>.*)$"
    ))
    .expect("valid label regex")
});

/// Backend output after noise removal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Normalized {
    /// Canonical, marker-delimited answer text
    pub text: String,
    /// Reasoning blocks removed from the answer, in order of appearance
    pub thinking: Vec<String>,
}

/// Normalize raw backend output.
///
/// Reasoning blocks are extracted first, then formatting artifacts are
/// stripped from what remains. Running this on its own output is a no-op.
pub fn normalize(raw: &str) -> Normalized {
    let (answer, mut thinking) = extract_thinking(raw);
    let mut text = strip_formatting(&answer);
    // Stripping markup can splice a new delimiter together (`<thi**nk>`)
    while THINK_OPEN.is_match(&text) || THINK_CLOSE.is_match(&text) {
        let (answer, more) = extract_thinking(&text);
        thinking.extend(more);
        text = strip_formatting(&answer);
    }
    Normalized { text, thinking }
}

/// Convenience wrapper returning only the canonical text.
pub fn normalize_text(raw: &str) -> String {
    normalize(raw).text
}

/// Remove every delimited reasoning block from `text`.
///
/// Returns the remaining answer and the captured reasoning. A closing
/// delimiter without an opening one marks everything before it as reasoning
/// (templates that pre-fill the opening tag produce this). An opening
/// delimiter that is never closed is dropped and its content kept.
pub fn extract_thinking(text: &str) -> (String, Vec<String>) {
    let mut remaining = text.replace("\r\n", "\n");
    let mut thinking = Vec::new();

    // Removing a delimiter can join its neighbours into a new one, so repeat
    // until no delimiter of any kind is left.
    loop {
        if let Some((range, inner)) = earliest_pair(&remaining) {
            push_thought(&mut thinking, &inner);
            remaining.replace_range(range, "");
        } else if let Some(close) = THINK_CLOSE.find(&remaining) {
            push_thought(&mut thinking, &remaining[..close.start()]);
            remaining = remaining[close.end()..].to_string();
        } else if THINK_OPEN.is_match(&remaining) {
            remaining = THINK_OPEN.replace_all(&remaining, "").into_owned();
        } else {
            break;
        }
    }

    (remaining.trim().to_string(), thinking)
}

/// First complete delimiter pair, by start offset.
fn earliest_pair(text: &str) -> Option<(std::ops::Range<usize>, String)> {
    THINK_PAIRS
        .iter()
        .filter_map(|re| {
            let caps = re.captures(text)?;
            Some((caps.get(0)?.range(), caps.get(1)?.as_str().to_string()))
        })
        .min_by_key(|(range, _)| range.start)
}

fn push_thought(thinking: &mut Vec<String>, content: &str) {
    let content = content.trim();
    if !content.is_empty() {
        thinking.push(content.to_string());
    }
}

/// Strip list markers, bold markup and blank lines, and rewrite section
/// labels to their canonical markers. Fenced code blocks are left intact.
pub fn strip_formatting(text: &str) -> String {
    let mut lines = Vec::new();
    let mut in_fence = false;

    for line in text.replace("\r\n", "\n").lines() {
        if line.trim().is_empty() {
            continue;
        }

        let fences = line.matches("```").count();
        if in_fence {
            lines.push(line.trim_end().to_string());
        } else {
            lines.push(clean_line(line));
        }
        if fences % 2 == 1 {
            in_fence = !in_fence;
        }
    }

    lines
        .into_iter()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn clean_line(line: &str) -> String {
    let line = strip_bold(line);
    let line = LIST_MARKER.replace(&line, "");

    match LABEL_LINE.captures(&line) {
        Some(caps) => {
            let label = caps
                .name("label")
                .map(|m| m.as_str())
                .unwrap_or_default();
            let rest = caps.name("rest").map(|m| m.as_str().trim()).unwrap_or("");
            let marker = canonical_marker(label);
            if rest.is_empty() {
                marker.to_string()
            } else {
                format!("{marker} {rest}")
            }
        }
        None => line.trim_end().to_string(),
    }
}

/// Remove `**` outside inline code spans.
fn strip_bold(line: &str) -> String {
    line.split('`')
        .enumerate()
        .map(|(i, segment)| {
            if i % 2 == 0 {
                segment.replace("**", "")
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("`")
}

fn canonical_marker(label: &str) -> &'static str {
    let label = label.split_whitespace().collect::<Vec<_>>().join(" ");
    let label = label.to_lowercase();
    LABELS
        .iter()
        .find(|(name, _)| *name == label)
        .map(|(_, marker)| *marker)
        .unwrap_or(EXPLANATION)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANONICAL: &str = "\u{1F50D} Root Cause: Typo\n\u{1F6E0}\u{FE0F} Fix: `whoami`\n\u{1F4DA} Technical Explanation: not found\n\u{1F512} Prevention Tip: use tab-completion";

    #[test]
    fn test_canonical_text_is_unchanged() {
        assert_eq!(normalize_text(CANONICAL), CANONICAL);
    }

    #[test]
    fn test_plain_labels_get_markers() {
        let raw = "Root Cause: Typo\nFix: `whoami`\nTechnical Explanation: not found\nPrevention Tip: use tab-completion";
        assert_eq!(normalize_text(raw), CANONICAL);
    }

    #[test]
    fn test_numbered_bold_labels() {
        let raw = "1. **Root Cause:** Typo\n\n2. **Fix:** `whoami`\n\n\n3. **Technical Explanation:** not found\n4. **Prevention Tip:** use tab-completion";
        assert_eq!(normalize_text(raw), CANONICAL);
    }

    #[test]
    fn test_alias_labels() {
        let text = normalize_text("Cause: disk full\nExplanation: no space\nPrevention: monitor usage");
        assert!(text.contains(&format!("{ROOT_CAUSE} disk full")));
        assert!(text.contains(&format!("{EXPLANATION} no space")));
        assert!(text.contains(&format!("{PREVENTION} monitor usage")));
    }

    #[test]
    fn test_warning_and_risk_stay_distinct() {
        let text = normalize_text("Warning: destructive\nPotential Risks: data loss");
        assert!(text.contains(&format!("{WARNING} destructive")));
        assert!(text.contains(&format!("{RISKS} data loss")));
    }

    #[test]
    fn test_label_mid_sentence_is_not_rewritten() {
        let text = normalize_text("To fix: run the installer");
        assert_eq!(text, "To fix: run the installer");
    }

    #[test]
    fn test_bold_inside_code_span_is_kept() {
        let text = normalize_text("**Fix:** `ls **/*.rs`");
        assert_eq!(text, format!("{FIX} `ls **/*.rs`"));
    }

    #[test]
    fn test_code_block_lines_untouched() {
        let raw = "Command: ```\n1. not a list\nWarning: literal\n```\nDetails: ok";
        let text = normalize_text(raw);
        assert!(text.contains("\n1. not a list\n"));
        assert!(text.contains("\nWarning: literal\n"));
        assert!(text.contains(&format!("{DETAILS} ok")));
    }

    #[test]
    fn test_single_thinking_block_removed() {
        let raw = "<think>the user typed whoam</think>\nRoot Cause: Typo";
        let normalized = normalize(raw);
        assert_eq!(normalized.text, format!("{ROOT_CAUSE} Typo"));
        assert_eq!(normalized.thinking, vec!["the user typed whoam".to_string()]);
    }

    #[test]
    fn test_many_thinking_blocks_removed() {
        for n in 0..5 {
            let mut raw = String::new();
            for i in 0..n {
                raw.push_str(&format!("<think>step {i}\nmore</think>\n"));
            }
            raw.push_str(CANONICAL);
            let normalized = normalize(&raw);
            assert_eq!(normalized.text, CANONICAL);
            assert_eq!(normalized.thinking.len(), n);
            assert!(!normalized.text.contains("think>"));
        }
    }

    #[test]
    fn test_mixed_delimiters_case_insensitive() {
        let raw = "<THINKING>a</THINKING><reasoning>b</reasoning>answer";
        let normalized = normalize(raw);
        assert_eq!(normalized.text, "answer");
        assert_eq!(normalized.thinking, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_orphan_closing_tag() {
        let normalized = normalize("pre-filled reasoning</think>\nFix: `ls`");
        assert_eq!(normalized.thinking, vec!["pre-filled reasoning".to_string()]);
        assert_eq!(normalized.text, format!("{FIX} `ls`"));
    }

    #[test]
    fn test_unclosed_opening_tag_keeps_content() {
        let normalized = normalize("<think>Fix: `ls`");
        assert!(normalized.thinking.is_empty());
        assert_eq!(normalized.text, format!("{FIX} `ls`"));
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            CANONICAL,
            "<think>x</think>1. **Fix:** `apt install curl`\n\n2. Risks: none",
            "Analysis: init repo\nCommand: ```bash\ngit init\n\ngit add .\n```\nWarning: none",
            "random prose\r\nwith ** stray bold and 1. numbers",
            "",
            "### Explanation:\n- **Cause**: bad flag",
            "<thi<think>nk>Fix: `ls`",
            "<thi**nk>Fix: `ls`",
            "</thi</think>nk>Root Cause: typo",
        ];
        for sample in samples {
            let once = normalize_text(sample);
            assert_eq!(normalize_text(&once), once, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn test_spliced_delimiters_are_removed() {
        assert_eq!(normalize_text("<thi<think>nk>Fix: `ls`"), format!("{FIX} `ls`"));
        assert_eq!(normalize_text("<thi**nk>Fix: `ls`"), format!("{FIX} `ls`"));
        let normalized = normalize("</thi</think>nk>Root Cause: typo");
        assert_eq!(normalized.text, "nk>Root Cause: typo");
        assert_eq!(normalized.thinking, vec!["</thi"]);
    }

    #[test]
    fn test_blank_lines_collapsed() {
        let text = normalize_text("a\n\n\n\nb\n   \nc");
        assert_eq!(text, "a\nb\nc");
    }
}

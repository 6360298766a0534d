//! Prompt construction for diagnosis and command generation.
//!
//! Both prompts ask for the canonical section markers so the parser can
//! locate fields without guessing.

use crate::context::{DiagnosticContext, EnvironmentFacts};
use crate::normalize::{
    ANALYSIS, COMMAND, DETAILS, EXPLANATION, FIX, PREVENTION, RISKS, ROOT_CAUSE, WARNING,
};

/// Build the prompt asking for a structured diagnosis of a failed command
pub fn diagnosis_prompt(context: &DiagnosticContext) -> String {
    format!(
        "[Terminal Error Diagnosis]
{context}

Required format (no markdown, one field per line):
{ROOT_CAUSE} <1-line diagnosis>
{FIX} `[executable command]`
{EXPLANATION} <specific system-level reason>
{RISKS} <if any>
{PREVENTION} <actionable advice>

Example:
{ROOT_CAUSE} Typo in command name
{FIX} `whoami`
{EXPLANATION} 'whoam' not found in $PATH
{RISKS} None
{PREVENTION} Use tab-completion for command names",
        context = context.format_for_prompt(),
    )
}

/// Build the prompt asking for shell commands that accomplish a request
pub fn command_prompt(query: &str, facts: &EnvironmentFacts) -> String {
    let mut prompt = format!(
        "You are a Linux terminal expert. Generate the command(s) for the request below.

Request: {query}

Response format:
{ANALYSIS} [1-line explanation]
{COMMAND} ```[executable command(s)]```
{DETAILS} [technical specifics]
{WARNING} [if dangerous]

Example multi-command response:
{ANALYSIS} Set up new Git repository and push
{COMMAND} ```
git init
git add .
git commit -m \"Initial commit\"
git remote add origin https://github.com/user/repo.git
git push -u origin main
```
{DETAILS} Full repository initialization and first push
{WARNING} Verify remote URL before pushing

Current context:
- OS: {os}
- Directory: {cwd}
- Git repo: {git}",
        query = query.trim(),
        os = facts.os,
        cwd = facts.cwd,
        git = if facts.git { "Yes" } else { "No" },
    );

    if !facts.history.is_empty() {
        prompt.push_str("\n- Recent commands:");
        for cmd in &facts.history {
            prompt.push_str("\n  ");
            prompt.push_str(cmd);
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnosis_prompt_contains_context_and_markers() {
        let ctx = DiagnosticContext::new("cat missing.txt", 1)
            .error_output("cat: missing.txt: No such file or directory")
            .working_dir("/home/user");
        let prompt = diagnosis_prompt(&ctx);

        assert!(prompt.contains("Failed Command: cat missing.txt"));
        assert!(prompt.contains("No such file or directory"));
        assert!(prompt.contains("/home/user"));
        for marker in [ROOT_CAUSE, FIX, EXPLANATION, RISKS, PREVENTION] {
            assert!(prompt.contains(marker), "missing {marker}");
        }
    }

    #[test]
    fn test_command_prompt_includes_environment() {
        let facts = EnvironmentFacts {
            os: "linux".to_string(),
            cwd: "/srv/app".to_string(),
            git: true,
            history: vec!["git status".to_string()],
        };
        let prompt = command_prompt("  undo last commit  ", &facts);

        assert!(prompt.contains("Request: undo last commit\n"));
        assert!(prompt.contains("- OS: linux"));
        assert!(prompt.contains("- Directory: /srv/app"));
        assert!(prompt.contains("- Git repo: Yes"));
        assert!(prompt.contains("  git status"));
        assert!(prompt.contains(COMMAND));
    }

    #[test]
    fn test_command_prompt_without_history() {
        let facts = EnvironmentFacts {
            os: "macos".to_string(),
            cwd: "/tmp".to_string(),
            git: false,
            history: Vec::new(),
        };
        let prompt = command_prompt("list ports", &facts);
        assert!(prompt.contains("- Git repo: No"));
        assert!(!prompt.contains("Recent commands"));
    }
}

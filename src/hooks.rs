//! Shell hook integration for automatic error analysis.
//!
//! The hook runs after every prompt and calls `shellsage run --analyze` when
//! the previous command failed. Setting `SHELLSAGE_HOOK_DISABLE=1` silences it
//! without uninstalling.

use anyhow::{Context, Result};
use clap_complete::Shell;
use std::io;
use std::path::{Path, PathBuf};

/// Marker comments for detecting existing hook installations
pub const HOOK_MARKER_START: &str = "# >>> shellsage hook >>>";
pub const HOOK_MARKER_END: &str = "# <<< shellsage hook <<<";

/// Shells with a hook script
pub const SUPPORTED_SHELLS: &[Shell] = &[Shell::Bash, Shell::Zsh, Shell::Fish];

/// Get the shell config file path for a given shell
pub fn get_shell_config_path(shell: Shell) -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    match shell {
        Shell::Bash => Some(home.join(".bashrc")),
        Shell::Zsh => Some(home.join(".zshrc")),
        Shell::Fish => {
            dirs::config_dir().map(|p| p.join("fish").join("conf.d").join("shellsage.fish"))
        }
        _ => None,
    }
}

/// Generate the hook script for a given shell
pub fn generate_hook_script(shell: Shell) -> Option<&'static str> {
    match shell {
        Shell::Bash => Some(
            r#"__shellsage_prompt() {
    local exit_code=$?
    [ "$exit_code" -eq 0 ] && return
    [ "$exit_code" -eq 130 ] && return
    [ "${SHELLSAGE_HOOK_DISABLE:-0}" = "1" ] && return
    local cmd
    cmd=$(fc -ln -1 | sed 's/^[[:space:]]*//')
    case "$cmd" in shellsage*) return ;; esac
    shellsage run --analyze --exit-code "$exit_code" -- "$cmd"
}
PROMPT_COMMAND="__shellsage_prompt${PROMPT_COMMAND:+;$PROMPT_COMMAND}"
"#,
        ),
        Shell::Zsh => Some(
            r#"__shellsage_precmd() {
    local exit_code=$?
    [[ $exit_code -eq 0 || $exit_code -eq 130 ]] && return
    [[ "${SHELLSAGE_HOOK_DISABLE:-0}" == "1" ]] && return
    local cmd
    cmd=$(fc -ln -1)
    [[ "$cmd" == shellsage* ]] && return
    shellsage run --analyze --exit-code "$exit_code" -- "$cmd"
}
autoload -Uz add-zsh-hook
add-zsh-hook precmd __shellsage_precmd
"#,
        ),
        Shell::Fish => Some(
            r#"function __shellsage_postexec --on-event fish_postexec
    set -l exit_code $status
    if test $exit_code -eq 0 -o $exit_code -eq 130
        return
    end
    if test "$SHELLSAGE_HOOK_DISABLE" = "1"
        return
    end
    if string match -q 'shellsage*' -- "$argv"
        return
    end
    shellsage run --analyze --exit-code $exit_code -- "$argv"
end
"#,
        ),
        _ => None,
    }
}

/// Generate the hook code wrapped with markers
pub fn generate_hook_with_markers(shell: Shell) -> Option<String> {
    let script = generate_hook_script(shell)?;
    Some(format!("{HOOK_MARKER_START}\n{script}{HOOK_MARKER_END}\n"))
}

/// Read a shell config file as raw bytes; a missing file reads as empty.
///
/// Shell rc files are not guaranteed to be UTF-8, and any other read failure
/// must abort the edit rather than overwrite the file.
fn read_config(config_path: &Path) -> Result<Vec<u8>> {
    match std::fs::read(config_path) {
        Ok(bytes) => Ok(bytes),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => {
            Err(err).with_context(|| format!("Failed to read: {}", config_path.display()))
        }
    }
}

fn contains_marker(content: &[u8]) -> bool {
    content
        .windows(HOOK_MARKER_START.len())
        .any(|window| window == HOOK_MARKER_START.as_bytes())
}

/// Check if hooks are already installed in a config file
pub fn hooks_already_installed(config_path: &Path) -> Result<bool> {
    Ok(contains_marker(&read_config(config_path)?))
}

/// Append the hook block to a config file. Returns false if it was already present.
pub fn install_into(config_path: &Path, shell: Shell) -> Result<bool> {
    let block = generate_hook_with_markers(shell)
        .with_context(|| format!("No hook available for {}", shell))?;

    let mut content = read_config(config_path)?;
    if contains_marker(&content) {
        return Ok(false);
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    if !content.is_empty() && !content.ends_with(b"\n") {
        content.push(b'\n');
    }
    if !content.is_empty() {
        content.push(b'\n');
    }
    content.extend_from_slice(block.as_bytes());

    std::fs::write(config_path, content)
        .with_context(|| format!("Failed to write to: {}", config_path.display()))?;
    Ok(true)
}

/// Remove the hook block from a config file. Returns false if none was present.
pub fn remove_from(config_path: &Path) -> Result<bool> {
    let content = read_config(config_path)?;
    if !contains_marker(&content) {
        return Ok(false);
    }

    let body = content.strip_suffix(b"\n").unwrap_or(&content);
    let mut new_content = Vec::with_capacity(content.len());
    let mut in_hook_block = false;
    for line in body.split(|byte| *byte == b'\n') {
        let trimmed = line.trim_ascii();
        if trimmed == HOOK_MARKER_START.as_bytes() {
            in_hook_block = true;
        } else if trimmed == HOOK_MARKER_END.as_bytes() {
            in_hook_block = false;
        } else if !in_hook_block {
            new_content.extend_from_slice(line);
            new_content.push(b'\n');
        }
    }
    while new_content.ends_with(b"\n\n") {
        new_content.pop();
    }

    std::fs::write(config_path, new_content)
        .with_context(|| format!("Failed to write to: {}", config_path.display()))?;
    Ok(true)
}

/// Config path for a shell, or an error naming the unsupported shell
pub fn config_path_for(shell: Shell) -> Result<PathBuf> {
    get_shell_config_path(shell)
        .with_context(|| format!("Could not determine config path for {}", shell))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_call_analyze() {
        for shell in SUPPORTED_SHELLS {
            let script = generate_hook_script(*shell).unwrap();
            assert!(script.contains("shellsage run --analyze --exit-code"));
            assert!(script.contains("SHELLSAGE_HOOK_DISABLE"));
        }
        assert!(generate_hook_script(Shell::Elvish).is_none());
    }

    #[test]
    fn test_markers_wrap_script() {
        let block = generate_hook_with_markers(Shell::Zsh).unwrap();
        assert!(block.starts_with(HOOK_MARKER_START));
        assert!(block.ends_with(&format!("{HOOK_MARKER_END}\n")));
        assert!(block.contains("add-zsh-hook precmd"));
    }

    #[test]
    fn test_install_then_uninstall_restores_file() {
        let dir = tempfile::tempdir().unwrap();
        let rc = dir.path().join(".bashrc");
        std::fs::write(&rc, "alias ll='ls -l'\n").unwrap();

        assert!(install_into(&rc, Shell::Bash).unwrap());
        assert!(hooks_already_installed(&rc).unwrap());
        let installed = std::fs::read_to_string(&rc).unwrap();
        assert!(installed.starts_with("alias ll='ls -l'\n\n"));
        assert!(installed.contains("__shellsage_prompt"));

        // second install is a no-op
        assert!(!install_into(&rc, Shell::Bash).unwrap());
        assert_eq!(std::fs::read_to_string(&rc).unwrap(), installed);

        assert!(remove_from(&rc).unwrap());
        assert_eq!(std::fs::read_to_string(&rc).unwrap(), "alias ll='ls -l'\n");
        assert!(!remove_from(&rc).unwrap());
    }

    #[test]
    fn test_install_keeps_non_utf8_config() {
        let dir = tempfile::tempdir().unwrap();
        let rc = dir.path().join(".bashrc");
        let original = b"export NAME=caf\xe9\nalias l=ls\n".to_vec();
        std::fs::write(&rc, &original).unwrap();

        assert!(install_into(&rc, Shell::Bash).unwrap());
        let installed = std::fs::read(&rc).unwrap();
        assert!(installed.starts_with(&original));
        assert!(hooks_already_installed(&rc).unwrap());

        assert!(remove_from(&rc).unwrap());
        assert_eq!(std::fs::read(&rc).unwrap(), original);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in place of the rc file fails to read with something other than NotFound
        let rc = dir.path().join(".bashrc");
        std::fs::create_dir(&rc).unwrap();

        assert!(install_into(&rc, Shell::Bash).is_err());
        assert!(hooks_already_installed(&rc).is_err());
        assert!(rc.is_dir());
    }

    #[test]
    fn test_missing_config_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let rc = dir.path().join(".zshrc");
        assert!(!hooks_already_installed(&rc).unwrap());
        assert!(!remove_from(&rc).unwrap());
        assert!(!rc.exists());
    }

    #[test]
    fn test_install_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("fish").join("conf.d").join("shellsage.fish");
        assert!(install_into(&conf, Shell::Fish).unwrap());
        assert!(std::fs::read_to_string(&conf)
            .unwrap()
            .starts_with(HOOK_MARKER_START));
    }
}

//! The backend interface the core consumes.
//!
//! Filesystem and sandbox backends live outside the core; the runtime
//! drives them through [`Backend`]. The `accept-edits` permission mode
//! additionally requires backends to reject shell commands that mutate
//! files behind the edit tools' back; [`is_mutating_command`] is the
//! screening predicate backends configure for that mode.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Metadata for one directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Entry path.
    pub path: String,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// Output of a shell command execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Combined stdout/stderr.
    pub output: String,
    /// Process exit code.
    pub exit_code: i32,
    /// Whether the output was truncated to the backend's cap.
    pub truncated: bool,
}

/// File and shell operations consumed by the core tools.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read a text file.
    async fn read(&self, path: &str) -> Result<String>;

    /// Read a file's raw bytes.
    async fn read_raw(&self, path: &str) -> Result<Vec<u8>>;

    /// Write a text file, creating parents as needed.
    async fn write(&self, path: &str, content: &str) -> Result<()>;

    /// Replace `old` with `new` in the file at `path`.
    async fn edit(&self, path: &str, old: &str, new: &str) -> Result<()>;

    /// List a directory.
    async fn ls_info(&self, path: &str) -> Result<Vec<FileInfo>>;

    /// Expand a glob pattern.
    async fn glob_info(&self, pattern: &str) -> Result<Vec<FileInfo>>;

    /// Search file contents, returning matching lines.
    async fn grep_raw(&self, pattern: &str, path: &str) -> Result<Vec<String>>;

    /// Execute a shell command. Optional; backends without shell support
    /// keep the default rejection.
    async fn execute(&self, command: &str) -> Result<ExecOutput> {
        let _ = command;
        Err(Error::validation("this backend does not execute commands"))
    }
}

fn mutation_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Redirections that write files.
            r"(^|[^>])>{1,2}\s*\S",
            // Destructive or mutating file commands.
            r"(^|[;&|]\s*)(rm|mv|cp|chmod|chown|chgrp|ln|mkdir|rmdir|touch|truncate|dd|tee)\b",
            // In-place editors.
            r"\bsed\s+(-[a-zA-Z]*i|--in-place)\b",
            // Package installation.
            r"\b(apt(-get)?|yum|dnf|brew|pip3?|npm|pnpm|yarn|cargo|gem)\s+(install|add|update|upgrade|remove|uninstall)\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static pattern"))
        .collect()
    })
}

/// Whether a shell command looks like it mutates files.
///
/// Used by backends configured for the `accept-edits` permission mode:
/// file mutations must go through the edit tools, so matching commands
/// are rejected.
#[must_use]
pub fn is_mutating_command(command: &str) -> bool {
    mutation_patterns().iter().any(|re| re.is_match(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirections_are_mutating() {
        assert!(is_mutating_command("echo hi > out.txt"));
        assert!(is_mutating_command("cat a.log >> combined.log"));
    }

    #[test]
    fn file_commands_are_mutating() {
        assert!(is_mutating_command("rm -rf build"));
        assert!(is_mutating_command("mv a.txt b.txt"));
        assert!(is_mutating_command("chmod +x run.sh"));
        assert!(is_mutating_command("ls; rm x"));
    }

    #[test]
    fn in_place_sed_is_mutating() {
        assert!(is_mutating_command("sed -i 's/a/b/' file.txt"));
        assert!(!is_mutating_command("sed 's/a/b/' file.txt"));
    }

    #[test]
    fn package_installs_are_mutating() {
        assert!(is_mutating_command("pip install requests"));
        assert!(is_mutating_command("npm install left-pad"));
        assert!(is_mutating_command("cargo add serde"));
    }

    #[test]
    fn read_only_commands_pass() {
        assert!(!is_mutating_command("ls -la"));
        assert!(!is_mutating_command("grep -rn pattern src"));
        assert!(!is_mutating_command("cat file.txt"));
        assert!(!is_mutating_command("git log --oneline"));
    }
}

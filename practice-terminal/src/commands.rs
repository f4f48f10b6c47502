//! Command allow-list for the shell-style command path
//!
//! This is a convenience check in front of `/execute_command`, not a security
//! boundary. The backend enforces its own list.

use std::collections::BTreeSet;

pub const DEFAULT_ALLOWED_COMMANDS: &[&str] = &[
    "python", "python3", "javac", "java", "g++", "ls", "cat", "echo",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Command not allowed: {command}")]
pub struct CommandRejected {
    pub command: String,
}

#[derive(Debug, Clone)]
pub struct CommandPolicy {
    allowed: BTreeSet<String>,
}

impl CommandPolicy {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    /// Check the first whitespace-separated token against the allow-list.
    pub fn check(&self, command_line: &str) -> Result<(), CommandRejected> {
        let base = command_line.split_whitespace().next().unwrap_or_default();
        if self.allowed.contains(base) {
            Ok(())
        } else {
            Err(CommandRejected {
                command: base.to_string(),
            })
        }
    }

    /// Allowed commands as a display string, sorted.
    pub fn describe(&self) -> String {
        self.allowed
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_COMMANDS.iter().copied())
    }
}

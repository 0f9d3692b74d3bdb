//! Structured command, validation, and execution result types.
//!
//! These types flow through the whole gateway: the parser produces a
//! `ParsedCommand`, the validator reduces it to a `ValidationResult`, and the
//! runner reports a `CommandResult` back to the MCP handler. All of them are
//! per-request values, created and dropped inside a single tool call.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Structured view of a CLI command string.
///
/// Produced by [`crate::parser::parse_command`]; immutable afterwards.
/// Ambiguity in the input shows up as empty fields, never as an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCommand {
    /// Lowercased tool name (`kubectl`, `helm`, `argocd`, `aws`, or other).
    pub tool: String,
    /// Primary verb. Two-level tools (argocd, aws) concatenate subject and
    /// verb: `"app sync"`, `"ec2 describe-instances"`.
    pub action: String,
    /// Normalized resource type (kubectl) or service/subject (aws, argocd).
    pub resource: Option<String>,
    /// Resource or release name, when one could be identified.
    pub name: Option<String>,
    /// Positional tokens in order.
    pub args: Vec<String>,
    /// Flag token (with leading dashes) to optional value.
    pub flags: HashMap<String, Option<String>>,
    /// The original unmodified command string.
    pub raw: String,
}

impl ParsedCommand {
    /// True if any of the given flag tokens is present.
    pub fn has_flag(&self, names: &[&str]) -> bool {
        names.iter().any(|n| self.flags.contains_key(*n))
    }

    /// Value of the first matching flag, if any carries one.
    pub fn get_flag(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .find_map(|n| self.flags.get(*n))
            .and_then(|v| v.as_deref())
    }

    /// Namespace from `-n` / `--namespace`.
    pub fn namespace(&self) -> Option<&str> {
        self.get_flag(&["-n", "--namespace"])
    }
}

/// Outcome of security validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Allow,
    Block {
        reason: String,
        rule: Option<String>,
    },
}

impl ValidationResult {
    pub fn allow() -> Self {
        Self::Allow
    }

    pub fn block(reason: impl Into<String>, rule: Option<&str>) -> Self {
        Self::Block {
            reason: reason.into(),
            rule: rule.map(str::to_string),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Block reason, empty for allows.
    pub fn reason(&self) -> &str {
        match self {
            Self::Allow => "",
            Self::Block { reason, .. } => reason,
        }
    }

    /// Identifier of the rule class that blocked, if any.
    pub fn rule(&self) -> Option<&str> {
        match self {
            Self::Allow => None,
            Self::Block { rule, .. } => rule.as_deref(),
        }
    }
}

/// Execution status of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Success,
    Error,
    Timeout,
    /// Rejected by security validation before any process was spawned.
    Blocked,
}

/// Result of executing (or refusing to execute) a command.
///
/// Invariants: `Success` implies `exit_code == Some(0)`; `Blocked` and
/// `Timeout` carry no exit code; `Blocked` always carries an error message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub status: CommandStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// Echo of the command this result belongs to.
    pub command: String,
    /// Whether stdout was cut at the configured output cap.
    pub truncated: bool,
    pub error_message: Option<String>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status == CommandStatus::Success && self.exit_code == Some(0)
    }

    pub fn blocked(command: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            status: CommandStatus::Blocked,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            command: command.into(),
            truncated: false,
            error_message: Some(reason),
        }
    }

    pub fn timeout(command: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            status: CommandStatus::Timeout,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            command: command.into(),
            truncated: false,
            error_message: Some(format!("command timed out after {timeout_secs}s")),
        }
    }

    pub fn error(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Error,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            command: command.into(),
            truncated: false,
            error_message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_lookup() {
        let mut cmd = ParsedCommand::default();
        cmd.flags.insert("-n".to_string(), Some("default".to_string()));
        cmd.flags.insert("--watch".to_string(), None);

        assert!(cmd.has_flag(&["-n"]));
        assert!(cmd.has_flag(&["--missing", "--watch"]));
        assert!(!cmd.has_flag(&["--missing"]));
        assert_eq!(cmd.get_flag(&["-n", "--namespace"]), Some("default"));
        assert_eq!(cmd.namespace(), Some("default"));
        assert_eq!(cmd.get_flag(&["--watch"]), None);
    }

    #[test]
    fn test_validation_result_accessors() {
        let allow = ValidationResult::allow();
        assert!(allow.is_allowed());
        assert_eq!(allow.reason(), "");
        assert_eq!(allow.rule(), None);

        let block = ValidationResult::block("nope", Some("regex_rules.kubectl"));
        assert!(!block.is_allowed());
        assert_eq!(block.reason(), "nope");
        assert_eq!(block.rule(), Some("regex_rules.kubectl"));
    }

    #[test]
    fn test_blocked_result_shape() {
        let result = CommandResult::blocked("kubectl delete ns prod", "matches dangerous pattern");
        assert_eq!(result.status, CommandStatus::Blocked);
        assert_eq!(result.exit_code, None);
        assert!(result.error_message.is_some());
        assert!(!result.success());
    }

    #[test]
    fn test_timeout_result_shape() {
        let result = CommandResult::timeout("sleep 100", 5);
        assert_eq!(result.status, CommandStatus::Timeout);
        assert_eq!(result.exit_code, None);
        assert!(result.error_message.unwrap().contains("5s"));
    }
}

//! Security validation for CLI commands.
//!
//! Three layers decide whether a command may run:
//!
//! 1. prefix blocklist (`dangerous_commands`)
//! 2. safe-pattern overrides that re-allow specific forms
//! 3. compiled regex rules applied to the raw string
//!
//! Pipe chains additionally require every stage after the first to be a
//! whitelisted unix command, and `kubectl exec` gets a dedicated shell check.
//! Validation never executes anything and never fails on malformed input.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::command::{ParsedCommand, ValidationResult};
use crate::config::{RegexRule, SecurityMode, SecuritySettings};
use crate::parser::{is_pipe_command, parse_command, split_pipe_commands};

/// kubectl verbs whose effect is not reversible by re-running.
const DESTRUCTIVE_ACTIONS: &[&str] = &["delete", "drain", "cordon", "taint"];

/// Shells that must not be spawned interactively through `kubectl exec`
/// without an explicit `-it`.
const EXEC_SHELLS: &[&str] = &["sh", "bash", "zsh", "/bin/sh", "/bin/bash", "/bin/zsh"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleAction {
    Block,
    Allow,
}

#[derive(Debug)]
struct CompiledRule {
    pattern: Regex,
    action: RuleAction,
    message: String,
}

/// Validates commands against the configured security policy.
///
/// Regex rules are compiled once at construction; invalid patterns are
/// dropped with a warning and never match. The validator is immutable after
/// construction and safe for concurrent reads; hot reload replaces the whole
/// value.
#[derive(Debug)]
pub struct CommandValidator {
    mode: SecurityMode,
    dangerous_commands: HashMap<String, Vec<String>>,
    safe_patterns: HashMap<String, Vec<String>>,
    regex_rules: HashMap<String, Vec<CompiledRule>>,
    allowed_unix_commands: HashSet<String>,
}

impl CommandValidator {
    pub fn new(security: &SecuritySettings) -> Self {
        let mut regex_rules: HashMap<String, Vec<CompiledRule>> = HashMap::new();
        for (tool, rules) in &security.regex_rules {
            let compiled = rules
                .iter()
                .filter_map(|rule| compile_rule(tool, rule))
                .collect();
            regex_rules.insert(tool.clone(), compiled);
        }

        Self {
            mode: security.mode,
            dangerous_commands: security.dangerous_commands.clone(),
            safe_patterns: security.safe_patterns.clone(),
            regex_rules,
            allowed_unix_commands: security.allowed_unix_commands.iter().cloned().collect(),
        }
    }

    /// Validate a command string, pipe chains included.
    pub fn validate(&self, command: &str) -> ValidationResult {
        if self.mode == SecurityMode::Permissive {
            return ValidationResult::allow();
        }

        if is_pipe_command(command) {
            return self.validate_pipe(command);
        }

        self.validate_parsed(&parse_command(command))
    }

    fn validate_pipe(&self, command: &str) -> ValidationResult {
        let stages = split_pipe_commands(command);

        for (i, stage) in stages.iter().enumerate() {
            let parsed = parse_command(stage);

            if i == 0 {
                let result = self.validate_parsed(&parsed);
                if !result.is_allowed() {
                    return result;
                }
            } else if !self.allowed_unix_commands.contains(&parsed.tool) {
                return ValidationResult::block(
                    format!("unix command '{}' is not allowed in pipes", parsed.tool),
                    Some("allowed_unix_commands"),
                );
            }
        }

        ValidationResult::allow()
    }

    fn validate_parsed(&self, parsed: &ParsedCommand) -> ValidationResult {
        let tool = parsed.tool.as_str();

        // Tools unknown to the policy skip straight to the regex pass.
        if !self.dangerous_commands.contains_key(tool) && !self.safe_patterns.contains_key(tool) {
            return self.check_regex_rules(parsed);
        }

        // Layer 1: dangerous prefix match on the raw string
        let raw_lower = parsed.raw.to_lowercase();
        let matched_prefix = self
            .dangerous_commands
            .get(tool)
            .into_iter()
            .flatten()
            .find(|prefix| raw_lower.starts_with(&prefix.to_lowercase()));

        let Some(matched_prefix) = matched_prefix else {
            return self.check_regex_rules(parsed);
        };

        // Layer 2: safe-pattern overrides
        let overridden = self
            .safe_patterns
            .get(tool)
            .into_iter()
            .flatten()
            .any(|pattern| matches_safe_pattern(parsed, pattern));

        if overridden {
            return self.check_regex_rules(parsed);
        }

        let rule = format!("dangerous_commands.{tool}");
        ValidationResult::block(
            format!("command blocked: matches dangerous pattern '{matched_prefix}'"),
            Some(rule.as_str()),
        )
    }

    /// Layer 3: regex rules for the command's tool.
    fn check_regex_rules(&self, parsed: &ParsedCommand) -> ValidationResult {
        let Some(rules) = self.regex_rules.get(&parsed.tool) else {
            return ValidationResult::allow();
        };

        for rule in rules {
            if rule.pattern.is_match(&parsed.raw) && rule.action == RuleAction::Block {
                let rule_id = format!("regex_rules.{}", parsed.tool);
                return ValidationResult::block(rule.message.clone(), Some(rule_id.as_str()));
            }
        }

        ValidationResult::allow()
    }

    /// Dedicated check for `kubectl exec`.
    ///
    /// Runs after general validation. Blocks bare interactive shells
    /// (`kubectl exec mypod -- bash`) unless the caller opted into
    /// interactivity with `-it`/`-ti`/`-i`/`-t`, asked for `--help`, or gave
    /// the shell a `-c` command.
    pub fn validate_exec(&self, parsed: &ParsedCommand) -> ValidationResult {
        if parsed.tool != "kubectl" || parsed.action != "exec" {
            return ValidationResult::allow();
        }

        if parsed.has_flag(&["--help"]) {
            return ValidationResult::allow();
        }

        if parsed.has_flag(&["-it", "-ti", "-i", "-t"]) {
            return ValidationResult::allow();
        }

        if let Some(sep) = parsed.args.iter().position(|a| a == "--") {
            let shell_args = &parsed.args[sep + 1..];
            if let Some(first) = shell_args.first() {
                if EXEC_SHELLS.contains(&first.as_str())
                    && !shell_args.iter().any(|a| a == "-c")
                {
                    return ValidationResult::block(
                        "interactive shell in exec without explicit -it flag is blocked",
                        Some("exec_shell_check"),
                    );
                }
            }
        }

        ValidationResult::allow()
    }

    /// Names permitted as non-first pipe stages.
    pub fn allowed_unix_commands(&self) -> &HashSet<String> {
        &self.allowed_unix_commands
    }

    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    /// Rule counts per tool, for introspection surfaces.
    pub fn rule_counts(&self) -> HashMap<String, (usize, usize, usize)> {
        let mut tools: HashSet<&String> = self.dangerous_commands.keys().collect();
        tools.extend(self.safe_patterns.keys());
        tools.extend(self.regex_rules.keys());

        tools
            .into_iter()
            .map(|tool| {
                (
                    tool.clone(),
                    (
                        self.dangerous_commands.get(tool).map_or(0, Vec::len),
                        self.safe_patterns.get(tool).map_or(0, Vec::len),
                        self.regex_rules.get(tool).map_or(0, Vec::len),
                    ),
                )
            })
            .collect()
    }
}

fn compile_rule(tool: &str, rule: &RegexRule) -> Option<CompiledRule> {
    let action = match rule.action.as_str() {
        "allow" => RuleAction::Allow,
        _ => RuleAction::Block,
    };

    match Regex::new(&rule.pattern) {
        Ok(pattern) => Some(CompiledRule {
            pattern,
            action,
            message: rule
                .message
                .clone()
                .unwrap_or_else(|| "command blocked by regex rule".to_string()),
        }),
        Err(e) => {
            warn!(tool, pattern = %rule.pattern, error = %e, "dropping invalid regex rule");
            None
        }
    }
}

/// Check whether a parsed command matches a safe pattern.
///
/// A pattern matches either as a word-boundary prefix of the raw string or
/// structurally (same tool and action, all pattern flags present, resource
/// equal when specified). Destructive patterns require a resource name to
/// follow: `kubectl delete pod` alone never re-allows `kubectl delete pod`
/// with nothing behind it.
fn matches_safe_pattern(parsed: &ParsedCommand, pattern: &str) -> bool {
    let raw_lower = parsed.raw.to_lowercase();
    let pattern_lower = pattern.to_lowercase();

    if let Some(remaining) = raw_lower.strip_prefix(&pattern_lower) {
        if remaining.starts_with(' ') || remaining.starts_with('\t') {
            // Content follows the pattern at a word boundary:
            // "kubectl delete pod nginx" matches "kubectl delete pod"
            return true;
        }
        if remaining.is_empty() {
            // Exact match with nothing behind it; destructive patterns
            // require a trailing name
            let pattern_parsed = parse_command(pattern);
            return !DESTRUCTIVE_ACTIONS.contains(&pattern_parsed.action.as_str());
        }
        // Word-boundary violation ("kubectl delete pods" vs "... pod"):
        // fall through to structural matching
    }

    let pattern_parsed = parse_command(pattern);

    if parsed.tool != pattern_parsed.tool || parsed.action != pattern_parsed.action {
        return false;
    }

    for flag in pattern_parsed.flags.keys() {
        if !parsed.flags.contains_key(flag) {
            return false;
        }
    }

    if let Some(pattern_resource) = &pattern_parsed.resource {
        if parsed.resource.as_ref() != Some(pattern_resource) {
            return false;
        }
        if DESTRUCTIVE_ACTIONS.contains(&pattern_parsed.action.as_str())
            && parsed.name.as_deref().unwrap_or("").is_empty()
        {
            return false;
        }
    }

    true
}

//! Command string parsing.
//!
//! Turns an opaque CLI string into a [`ParsedCommand`] so validation can
//! reason about tool, action, resource, and flags instead of raw prefixes.
//! Parsing is total: malformed input degrades to whitespace splitting and
//! empty fields, it never fails.

use std::collections::HashMap;

use crate::command::ParsedCommand;

/// kubectl actions whose first positional is a resource type.
const KUBECTL_RESOURCE_ACTIONS: &[&str] = &[
    "get",
    "describe",
    "delete",
    "create",
    "apply",
    "patch",
    "edit",
    "label",
    "annotate",
    "scale",
    "rollout",
    "expose",
    "autoscale",
    "logs",
    "exec",
    "cp",
    "port-forward",
    "attach",
    "debug",
];

/// helm actions whose first positional is a release name.
const HELM_RELEASE_ACTIONS: &[&str] =
    &["install", "upgrade", "uninstall", "delete", "status", "history"];

/// Split a command string into argv tokens.
///
/// Quote handling follows shell word rules; unbalanced quotes fall back to
/// plain whitespace splitting. `$`, backticks, redirects, and globs are never
/// interpreted and pass through as literal tokens.
pub fn tokenize(command: &str) -> Vec<String> {
    match shell_words::split(command) {
        Ok(tokens) => tokens,
        Err(_) => command.split_whitespace().map(str::to_string).collect(),
    }
}

/// Parse a command string into a structured [`ParsedCommand`].
///
/// Never fails; an empty or unrecognizable command yields empty fields.
pub fn parse_command(command: &str) -> ParsedCommand {
    let tokens = tokenize(command);
    let Some(first) = tokens.first() else {
        return ParsedCommand {
            raw: command.to_string(),
            ..Default::default()
        };
    };

    let tool = first.to_lowercase();
    let rest = &tokens[1..];

    match tool.as_str() {
        "kubectl" => parse_kubectl(rest, command),
        "helm" => parse_helm(rest, command),
        "argocd" => parse_two_level("argocd", rest, command),
        "aws" => parse_two_level("aws", rest, command),
        _ => parse_generic(tool, rest, command),
    }
}

/// Flag/positional scan shared by all tool parsers.
///
/// - `--flag=value` splits at the first `=`
/// - `--flag value` and `-f value` consume the value iff it does not start
///   with `-`
/// - short-flag clusters (`-it`) are stored without a value
/// - a literal `--` ends flag interpretation; it and everything after it are
///   positionals
fn scan_tokens(
    tokens: &[String],
    cluster_short_flags: bool,
) -> (Vec<String>, HashMap<String, Option<String>>) {
    let mut args = Vec::new();
    let mut flags = HashMap::new();

    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];

        if token == "--" {
            args.extend(tokens[i..].iter().cloned());
            break;
        }

        if let Some(rest) = token.strip_prefix("--") {
            if let Some(eq) = rest.find('=') {
                let key = format!("--{}", &rest[..eq]);
                flags.insert(key, Some(rest[eq + 1..].to_string()));
            } else if i + 1 < tokens.len() && !tokens[i + 1].starts_with('-') {
                flags.insert(token.clone(), Some(tokens[i + 1].clone()));
                i += 1;
            } else {
                flags.insert(token.clone(), None);
            }
        } else if token.starts_with('-') && token.len() == 2 {
            if i + 1 < tokens.len() && !tokens[i + 1].starts_with('-') {
                flags.insert(token.clone(), Some(tokens[i + 1].clone()));
                i += 1;
            } else {
                flags.insert(token.clone(), None);
            }
        } else if cluster_short_flags && token.starts_with('-') && token.len() > 2 {
            // Combined short flags like -it or -ti
            flags.insert(token.clone(), None);
        } else {
            args.push(token.clone());
        }

        i += 1;
    }

    (args, flags)
}

fn parse_kubectl(tokens: &[String], raw: &str) -> ParsedCommand {
    let Some(action) = tokens.first() else {
        return ParsedCommand {
            tool: "kubectl".to_string(),
            raw: raw.to_string(),
            ..Default::default()
        };
    };

    let (args, flags) = scan_tokens(&tokens[1..], true);

    let mut resource = None;
    let mut name = None;
    if KUBECTL_RESOURCE_ACTIONS.contains(&action.as_str()) {
        if let Some(first) = args.first() {
            if let Some((kind, res_name)) = first.split_once('/') {
                // type/name form
                resource = Some(normalize_resource_type(kind));
                name = Some(res_name.to_string());
            } else {
                resource = Some(normalize_resource_type(first));
                name = args.get(1).cloned();
            }
        }
    }

    ParsedCommand {
        tool: "kubectl".to_string(),
        action: action.clone(),
        resource,
        name,
        args,
        flags,
        raw: raw.to_string(),
    }
}

fn parse_helm(tokens: &[String], raw: &str) -> ParsedCommand {
    let Some(action) = tokens.first() else {
        return ParsedCommand {
            tool: "helm".to_string(),
            raw: raw.to_string(),
            ..Default::default()
        };
    };

    let (args, flags) = scan_tokens(&tokens[1..], false);

    let name = if HELM_RELEASE_ACTIONS.contains(&action.as_str()) {
        args.first().cloned()
    } else {
        None
    };

    ParsedCommand {
        tool: "helm".to_string(),
        action: action.clone(),
        resource: None,
        name,
        args,
        flags,
        raw: raw.to_string(),
    }
}

/// argocd and aws both use `<tool> <subject> <verb> [args]`; the subject is
/// kept in `resource` and the action is the joined pair.
fn parse_two_level(tool: &str, tokens: &[String], raw: &str) -> ParsedCommand {
    if tokens.is_empty() {
        return ParsedCommand {
            tool: tool.to_string(),
            raw: raw.to_string(),
            ..Default::default()
        };
    }

    let subject = tokens.first().cloned().unwrap_or_default();
    let verb = tokens.get(1).cloned().unwrap_or_default();
    let remainder: &[String] = if tokens.len() > 2 { &tokens[2..] } else { &[] };

    let (args, flags) = scan_tokens(remainder, false);

    // argocd names the app with the first positional; aws positionals stay
    // plain arguments.
    let name = if tool == "argocd" {
        args.first().cloned()
    } else {
        None
    };

    ParsedCommand {
        tool: tool.to_string(),
        action: format!("{subject} {verb}").trim().to_string(),
        resource: Some(subject).filter(|s| !s.is_empty()),
        name,
        args,
        flags,
        raw: raw.to_string(),
    }
}

fn parse_generic(tool: String, tokens: &[String], raw: &str) -> ParsedCommand {
    let action = tokens.first().cloned().unwrap_or_default();
    let args = if tokens.len() > 1 {
        tokens[1..].to_vec()
    } else {
        Vec::new()
    };

    ParsedCommand {
        tool,
        action,
        resource: None,
        name: None,
        args,
        flags: HashMap::new(),
        raw: raw.to_string(),
    }
}

/// Normalize a Kubernetes resource type to its canonical singular.
///
/// Unknown strings pass through lowercased.
pub fn normalize_resource_type(resource: &str) -> String {
    let lower = resource.to_lowercase();
    let canonical = match lower.as_str() {
        "po" | "pods" => "pod",
        "svc" | "services" => "service",
        "deploy" | "deployments" => "deployment",
        "rs" | "replicasets" => "replicaset",
        "ds" | "daemonsets" => "daemonset",
        "sts" | "statefulsets" => "statefulset",
        "cm" | "configmaps" => "configmap",
        "ns" | "namespaces" => "namespace",
        "no" | "nodes" => "node",
        "pv" | "persistentvolumes" => "persistentvolume",
        "pvc" | "persistentvolumeclaims" => "persistentvolumeclaim",
        "ing" | "ingresses" => "ingress",
        "netpol" | "networkpolicies" => "networkpolicy",
        "sa" | "serviceaccounts" => "serviceaccount",
        "hpa" | "horizontalpodautoscalers" => "horizontalpodautoscaler",
        "cj" | "cronjobs" => "cronjob",
        "jobs" => "job",
        "secrets" => "secret",
        "ep" => "endpoints",
        "ev" | "events" => "event",
        _ => return lower,
    };
    canonical.to_string()
}

/// True if the command contains an unquoted pipe operator.
pub fn is_pipe_command(command: &str) -> bool {
    let mut in_single = false;
    let mut in_double = false;

    for ch in command.chars() {
        match ch {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '|' if !in_single && !in_double => return true,
            _ => {}
        }
    }

    false
}

/// Split a piped command into its trimmed, non-empty stages in order.
pub fn split_pipe_commands(command: &str) -> Vec<String> {
    let mut stages = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;

    for ch in command.chars() {
        match ch {
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(ch);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(ch);
            }
            '|' if !in_single && !in_double => {
                stages.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        stages.push(current.trim().to_string());
    }

    stages.into_iter().filter(|s| !s.is_empty()).collect()
}

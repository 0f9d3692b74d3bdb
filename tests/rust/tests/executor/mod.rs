//! Executor integration tests.
//!
//! Exercise the parse → validate → execute chain end to end against real
//! unix binaries, plus the embedded default security policy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use tokio::sync::RwLock;

use kubegate_core::command::CommandStatus;
use kubegate_core::config::{load_config, CommandSettings};
use kubegate_core::parser::parse_command;
use kubegate_core::validator::CommandValidator;
use kubegate_exec::runner::CommandRunner;
use tests::permissive_runner;

fn default_policy_validator() -> CommandValidator {
    let config = load_config(Some(std::path::Path::new("/nonexistent"))).unwrap();
    CommandValidator::new(&config.security)
}

#[test]
fn test_allowed_kubectl_get_parses_and_validates() {
    let parsed = parse_command("kubectl get pods -n default");
    assert_eq!(parsed.tool, "kubectl");
    assert_eq!(parsed.action, "get");
    assert_eq!(parsed.resource.as_deref(), Some("pod"));
    assert_eq!(parsed.flags.get("-n"), Some(&Some("default".to_string())));

    let verdict = default_policy_validator().validate("kubectl get pods -n default");
    assert!(verdict.is_allowed());
}

#[test]
fn test_default_policy_blocks_delete_all() {
    let verdict = default_policy_validator().validate("kubectl delete pods --all");
    assert!(!verdict.is_allowed());
}

#[test]
fn test_default_policy_allows_named_pod_delete() {
    let verdict = default_policy_validator().validate("kubectl delete pod nginx");
    assert!(verdict.is_allowed());
}

#[test]
fn test_default_policy_blocks_bare_pod_delete() {
    let verdict = default_policy_validator().validate("kubectl delete pod");
    assert!(!verdict.is_allowed());
}

#[test]
fn test_default_policy_blocks_disallowed_pipe_stage() {
    let verdict = default_policy_validator().validate("kubectl get pods | python -c 'x'");
    assert!(!verdict.is_allowed());
    assert!(verdict.reason().contains("python"));
}

#[test]
fn test_default_policy_allows_grep_pipe() {
    let verdict = default_policy_validator().validate("kubectl get pods | grep nginx | wc -l");
    assert!(verdict.is_allowed());
}

#[test]
fn test_default_policy_exec_shell_check() {
    let validator = default_policy_validator();

    let blocked = validator.validate_exec(&parse_command("kubectl exec mypod -- bash"));
    assert!(!blocked.is_allowed());
    assert_eq!(blocked.rule(), Some("exec_shell_check"));

    let allowed = validator.validate_exec(&parse_command("kubectl exec -it mypod -- bash"));
    assert!(allowed.is_allowed());
}

#[tokio::test]
async fn test_runner_exit_codes_flow_through() {
    let runner = permissive_runner();

    let ok = runner.execute("true", None).await;
    assert_eq!(ok.status, CommandStatus::Success);
    assert_eq!(ok.exit_code, Some(0));

    let fail = runner.execute("false", None).await;
    assert_eq!(fail.status, CommandStatus::Error);
    assert_eq!(fail.exit_code, Some(1));
}

#[tokio::test]
async fn test_runner_timeout_leaves_no_child() {
    let runner = permissive_runner();
    let started = Instant::now();

    let result = runner.execute("sleep 60", Some(1)).await;
    assert_eq!(result.status, CommandStatus::Timeout);
    assert_eq!(result.exit_code, None);
    // The child was killed and reaped, not waited for
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_runner_pipe_bytes_flow() {
    let runner = permissive_runner();
    let result = runner
        .execute("echo alpha beta gamma | tr ' ' '\n' | grep a | wc -l", None)
        .await;
    assert_eq!(result.status, CommandStatus::Success);
    assert_eq!(result.stdout.trim(), "3");
}

#[tokio::test]
async fn test_runner_shell_metacharacters_stay_literal() {
    let runner = permissive_runner();
    let result = runner.execute(r#"echo "$(rm -rf /)""#, None).await;
    assert_eq!(result.status, CommandStatus::Success);
    assert!(result.stdout.contains("$(rm -rf /)"));
}

#[tokio::test]
async fn test_truncation_cap_is_byte_exact() {
    let security = kubegate_core::config::SecuritySettings {
        mode: kubegate_core::config::SecurityMode::Permissive,
        ..Default::default()
    };
    let runner = CommandRunner::new(
        Arc::new(RwLock::new(CommandValidator::new(&security))),
        CommandSettings {
            default_timeout: 30,
            max_output_size: 64,
        },
    );

    let result = runner
        .execute("sh -c 'for i in 1 2 3 4 5 6 7 8; do echo 0123456789012345; done'", None)
        .await;
    assert!(result.truncated);
    assert_eq!(result.stdout.len(), 64);

    let small = runner.execute("echo ok", None).await;
    assert!(!small.truncated);
}

#[tokio::test]
async fn test_blocked_command_reports_rule_class() {
    let config = load_config(Some(std::path::Path::new("/nonexistent"))).unwrap();
    let runner = CommandRunner::new(
        Arc::new(RwLock::new(CommandValidator::new(&config.security))),
        config.command.clone(),
    );

    let result = runner.execute("kubectl delete namespace prod", None).await;
    assert_eq!(result.status, CommandStatus::Blocked);
    assert_eq!(result.exit_code, None);
    assert!(result
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("dangerous"));
}

#[tokio::test]
async fn test_runner_applies_exec_shell_check() {
    let config = load_config(Some(std::path::Path::new("/nonexistent"))).unwrap();
    let runner = CommandRunner::new(
        Arc::new(RwLock::new(CommandValidator::new(&config.security))),
        config.command.clone(),
    );

    let blocked = runner.execute("kubectl exec mypod -- bash", None).await;
    assert_eq!(blocked.status, CommandStatus::Blocked);
    assert!(blocked
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("interactive shell"));
}

#[tokio::test]
async fn test_validator_hot_swap_applies_to_next_call() {
    let mut security = kubegate_core::config::SecuritySettings::default();
    security
        .dangerous_commands
        .insert("echo".to_string(), vec!["echo danger".to_string()]);
    let runner = CommandRunner::new(
        Arc::new(RwLock::new(CommandValidator::new(&security))),
        CommandSettings::default(),
    );

    let blocked = runner.execute("echo danger zone", None).await;
    assert_eq!(blocked.status, CommandStatus::Blocked);

    // Swap in a permissive policy, as the SIGHUP path does
    let permissive = kubegate_core::config::SecuritySettings {
        mode: kubegate_core::config::SecurityMode::Permissive,
        ..Default::default()
    };
    *runner.validator().write().await = CommandValidator::new(&permissive);

    let after = runner.execute("echo danger zone", None).await;
    assert_eq!(after.status, CommandStatus::Success);
    assert_eq!(after.stdout, "danger zone\n");
}

//! Asynchronous command execution.
//!
//! Every command is spawned from an explicit argv array produced by the
//! parser, never through a shell. Stdout is captured as bytes, capped before
//! decoding, and decoded with replacement for invalid sequences. Pipe chains
//! execute stage by stage, feeding captured bytes forward, with a shared
//! timeout budget split across stages.
//!
//! Expected failures come back as [`CommandResult`] values; this module only
//! logs, it never panics or raises for a misbehaving child.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use kubegate_core::command::{CommandResult, CommandStatus};
use kubegate_core::config::CommandSettings;
use kubegate_core::parser::{is_pipe_command, parse_command, split_pipe_commands, tokenize};
use kubegate_core::validator::CommandValidator;

/// Floor for the per-stage budget of a pipe chain, in seconds.
const MIN_STAGE_TIMEOUT: u64 = 10;

/// Timeout for help and probe commands.
const DESCRIBE_TIMEOUT: u64 = 10;

/// Place each child in its own process group so terminal signals aimed at
/// the gateway do not propagate into spawned CLI tools.
fn configure_child_platform(cmd: &mut Command) {
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
    #[cfg(not(unix))]
    {
        let _ = cmd;
    }
}

enum StageOutcome {
    Completed {
        code: Option<i32>,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    TimedOut,
    SpawnError(String),
}

/// Executes validated commands and supervises their child processes.
///
/// The validator sits behind a read-mostly lock so a configuration reload
/// can swap the policy without interrupting in-flight requests.
pub struct CommandRunner {
    validator: Arc<RwLock<CommandValidator>>,
    settings: CommandSettings,
}

impl CommandRunner {
    pub fn new(validator: Arc<RwLock<CommandValidator>>, settings: CommandSettings) -> Self {
        Self {
            validator,
            settings,
        }
    }

    /// Handle to the shared validator cell, for hot reload.
    pub fn validator(&self) -> Arc<RwLock<CommandValidator>> {
        self.validator.clone()
    }

    pub fn default_timeout(&self) -> u64 {
        self.settings.default_timeout
    }

    /// Execute a command under the active security policy.
    pub async fn execute(&self, command: &str, timeout: Option<u64>) -> CommandResult {
        self.run(command, timeout, true).await
    }

    /// Execute without validation. Reserved for availability probes and help
    /// lookups, which must work before any policy is trusted.
    pub async fn execute_unchecked(&self, command: &str, timeout: Option<u64>) -> CommandResult {
        self.run(command, timeout, false).await
    }

    /// Run `{tool} [subcommand] {help_flag}` with a short fixed timeout.
    pub async fn describe(
        &self,
        tool: &str,
        subcommand: Option<&str>,
        help_flag: &str,
    ) -> CommandResult {
        let command = match subcommand {
            Some(sub) if !sub.is_empty() => format!("{tool} {sub} {help_flag}"),
            _ => format!("{tool} {help_flag}"),
        };
        self.execute_unchecked(&command, Some(DESCRIBE_TIMEOUT)).await
    }

    async fn run(&self, command: &str, timeout: Option<u64>, validate: bool) -> CommandResult {
        let timeout = timeout.unwrap_or(self.settings.default_timeout);

        if validate {
            let validator = self.validator.read().await;
            let verdict = validator.validate(command);
            if !verdict.is_allowed() {
                debug!(command, rule = ?verdict.rule(), "command blocked");
                return CommandResult::blocked(command, verdict.reason());
            }

            // kubectl exec carries its own shell check on top of the policy
            let head = if is_pipe_command(command) {
                split_pipe_commands(command).into_iter().next()
            } else {
                None
            };
            let parsed = parse_command(head.as_deref().unwrap_or(command));
            let verdict = validator.validate_exec(&parsed);
            if !verdict.is_allowed() {
                debug!(command, "exec shell check blocked command");
                return CommandResult::blocked(command, verdict.reason());
            }
        }

        if is_pipe_command(command) {
            self.run_piped(command, timeout).await
        } else {
            self.run_single(command, timeout).await
        }
    }

    async fn run_single(&self, command: &str, timeout: u64) -> CommandResult {
        let tokens = tokenize(command);
        if tokens.is_empty() {
            return CommandResult::error(command, "empty command");
        }

        debug!(command, timeout, "executing command");
        match run_stage(&tokens, None, Duration::from_secs(timeout)).await {
            StageOutcome::Completed {
                code,
                stdout,
                stderr,
            } => self.finish(command, code, stdout, stderr),
            StageOutcome::TimedOut => {
                warn!(command, timeout, "command timed out");
                CommandResult::timeout(command, timeout)
            }
            StageOutcome::SpawnError(message) => {
                warn!(command, error = %message, "command failed to start");
                CommandResult::error(command, message)
            }
        }
    }

    /// Execute a pipe chain stage by stage.
    ///
    /// Each stage gets `max(timeout / n, 10)` seconds. A failing intermediate
    /// stage still feeds its stdout downstream; the final stage's exit code
    /// and stderr decide the result. Only the final stdout is capped.
    async fn run_piped(&self, command: &str, timeout: u64) -> CommandResult {
        let stages = split_pipe_commands(command);
        if stages.is_empty() {
            return CommandResult::error(command, "empty command");
        }

        let budget = (timeout / stages.len() as u64).max(MIN_STAGE_TIMEOUT);
        debug!(command, stages = stages.len(), budget, "executing pipe chain");

        let mut carried: Option<Vec<u8>> = None;
        let mut last_code: Option<i32> = None;
        let mut last_stderr: Vec<u8> = Vec::new();

        for (i, stage) in stages.iter().enumerate() {
            let tokens = tokenize(stage);
            if tokens.is_empty() {
                return CommandResult::error(command, format!("empty command at stage {}", i + 1));
            }

            match run_stage(&tokens, carried.take(), Duration::from_secs(budget)).await {
                StageOutcome::Completed {
                    code,
                    stdout,
                    stderr,
                } => {
                    if code != Some(0) {
                        debug!(stage = i + 1, ?code, "pipe stage exited non-zero");
                    }
                    carried = Some(stdout);
                    last_code = code;
                    last_stderr = stderr;
                }
                StageOutcome::TimedOut => {
                    warn!(command, stage = i + 1, budget, "pipe stage timed out");
                    let mut result = CommandResult::timeout(command, budget);
                    result.error_message =
                        Some(format!("stage {} timed out after {budget}s", i + 1));
                    return result;
                }
                StageOutcome::SpawnError(message) => {
                    warn!(command, stage = i + 1, error = %message, "pipe stage failed to start");
                    return CommandResult::error(
                        command,
                        format!("stage {}: {message}", i + 1),
                    );
                }
            }
        }

        self.finish(command, last_code, carried.unwrap_or_default(), last_stderr)
    }

    /// Cap stdout bytes, decode both streams, and map the exit code.
    fn finish(
        &self,
        command: &str,
        code: Option<i32>,
        mut stdout: Vec<u8>,
        stderr: Vec<u8>,
    ) -> CommandResult {
        let mut truncated = false;
        if stdout.len() > self.settings.max_output_size {
            debug!(
                command,
                size = stdout.len(),
                cap = self.settings.max_output_size,
                "truncating output"
            );
            stdout.truncate(self.settings.max_output_size);
            truncated = true;
        }

        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();

        let (status, error_message) = match code {
            Some(0) => (CommandStatus::Success, None),
            Some(_) => (CommandStatus::Error, None),
            None => (
                CommandStatus::Error,
                Some("process terminated by signal".to_string()),
            ),
        };

        CommandResult {
            status,
            stdout,
            stderr,
            exit_code: code,
            command: command.to_string(),
            truncated,
            error_message,
        }
    }
}

/// Spawn one argv stage, optionally feeding bytes to its stdin, and wait for
/// it within the budget. On deadline the child is killed and reaped before
/// returning.
async fn run_stage(tokens: &[String], input: Option<Vec<u8>>, budget: Duration) -> StageOutcome {
    let mut cmd = Command::new(&tokens[0]);
    cmd.args(&tokens[1..])
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    configure_child_platform(&mut cmd);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return StageOutcome::SpawnError(format!("failed to spawn '{}': {e}", tokens[0]));
        }
    };

    // Feed stdin concurrently; a full pipe buffer must not deadlock against
    // the child writing its own output.
    if let Some(data) = input {
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                let _ = stdin.write_all(&data).await;
                let _ = stdin.shutdown().await;
            });
        }
    }

    let stdout_task = child.stdout.take().map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf).await;
            buf
        })
    });
    let stderr_task = child.stderr.take().map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf).await;
            buf
        })
    });

    match tokio::time::timeout(budget, child.wait()).await {
        Ok(Ok(status)) => {
            let stdout = match stdout_task {
                Some(task) => task.await.unwrap_or_default(),
                None => Vec::new(),
            };
            let stderr = match stderr_task {
                Some(task) => task.await.unwrap_or_default(),
                None => Vec::new(),
            };
            StageOutcome::Completed {
                code: status.code(),
                stdout,
                stderr,
            }
        }
        Ok(Err(e)) => {
            StageOutcome::SpawnError(format!("failed waiting for '{}': {e}", tokens[0]))
        }
        Err(_) => {
            // Kill and reap before reporting the timeout
            if let Err(e) = child.kill().await {
                warn!(command = %tokens[0], error = %e, "failed to kill timed-out child");
            }
            StageOutcome::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubegate_core::config::{SecurityMode, SecuritySettings};
    use std::time::Instant;

    fn permissive_runner() -> CommandRunner {
        let security = SecuritySettings {
            mode: SecurityMode::Permissive,
            ..Default::default()
        };
        CommandRunner::new(
            Arc::new(RwLock::new(CommandValidator::new(&security))),
            CommandSettings::default(),
        )
    }

    fn strict_runner() -> CommandRunner {
        let mut security = SecuritySettings::default();
        security
            .dangerous_commands
            .insert("kubectl".to_string(), vec!["kubectl delete".to_string()]);
        security
            .dangerous_commands
            .insert("echo".to_string(), vec!["echo danger".to_string()]);
        CommandRunner::new(
            Arc::new(RwLock::new(CommandValidator::new(&security))),
            CommandSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_echo_success() {
        let result = permissive_runner().execute("echo hello", None).await;
        assert_eq!(result.status, CommandStatus::Success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout, "hello\n");
        assert!(result.success());
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn test_exit_code_fidelity() {
        let result = permissive_runner()
            .execute("sh -c 'exit 3'", None)
            .await;
        assert_eq!(result.status, CommandStatus::Error);
        assert_eq!(result.exit_code, Some(3));
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_binary_not_found() {
        let result = permissive_runner()
            .execute("definitely-not-a-binary-kubegate", None)
            .await;
        assert_eq!(result.status, CommandStatus::Error);
        assert_eq!(result.exit_code, None);
        assert!(result
            .error_message
            .as_deref()
            .unwrap_or_default()
            .contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let started = Instant::now();
        let result = permissive_runner().execute("sleep 30", Some(1)).await;
        assert_eq!(result.status, CommandStatus::Timeout);
        assert_eq!(result.exit_code, None);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_output_truncated_at_cap() {
        let security = SecuritySettings {
            mode: SecurityMode::Permissive,
            ..Default::default()
        };
        let runner = CommandRunner::new(
            Arc::new(RwLock::new(CommandValidator::new(&security))),
            CommandSettings {
                default_timeout: 30,
                max_output_size: 100,
            },
        );

        let result = runner
            .execute("sh -c 'for i in 1 2 3 4 5 6 7 8 9 0; do echo 0123456789012345678; done'", None)
            .await;
        assert_eq!(result.status, CommandStatus::Success);
        assert!(result.truncated);
        assert_eq!(result.stdout.len(), 100);
    }

    #[tokio::test]
    async fn test_small_output_not_truncated() {
        let result = permissive_runner().execute("echo ok", None).await;
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn test_no_shell_interpolation() {
        let result = permissive_runner()
            .execute(r#"echo "$(rm -rf /)""#, None)
            .await;
        assert_eq!(result.status, CommandStatus::Success);
        assert!(result.stdout.contains("$(rm -rf /)"));
    }

    #[tokio::test]
    async fn test_pipe_chain() {
        let result = permissive_runner()
            .execute("echo hello | grep hello", None)
            .await;
        assert_eq!(result.status, CommandStatus::Success);
        assert_eq!(result.stdout, "hello\n");
    }

    #[tokio::test]
    async fn test_pipe_failed_intermediate_feeds_downstream() {
        let result = permissive_runner()
            .execute("sh -c 'echo out; exit 7' | cat", None)
            .await;
        // Final stage decides the status, shell-style
        assert_eq!(result.status, CommandStatus::Success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout, "out\n");
    }

    #[tokio::test]
    async fn test_pipe_final_stage_failure() {
        let result = permissive_runner()
            .execute("echo hello | grep nomatch", None)
            .await;
        assert_eq!(result.status, CommandStatus::Error);
        assert_eq!(result.exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_pipe_three_stages() {
        let result = permissive_runner()
            .execute("echo one two three | tr ' ' '\n' | wc -l", None)
            .await;
        assert_eq!(result.status, CommandStatus::Success);
        assert_eq!(result.stdout.trim(), "3");
    }

    #[tokio::test]
    async fn test_blocked_command_returns_blocked() {
        let result = strict_runner().execute("kubectl delete ns prod", None).await;
        assert_eq!(result.status, CommandStatus::Blocked);
        assert_eq!(result.exit_code, None);
        assert!(result
            .error_message
            .as_deref()
            .unwrap_or_default()
            .contains("dangerous"));
    }

    #[tokio::test]
    async fn test_unchecked_bypasses_policy() {
        let runner = strict_runner();

        let checked = runner.execute("echo danger ok", None).await;
        assert_eq!(checked.status, CommandStatus::Blocked);

        // Probes and help lookups skip validation entirely
        let unchecked = runner.execute_unchecked("echo danger ok", None).await;
        assert_eq!(unchecked.status, CommandStatus::Success);
        assert_eq!(unchecked.stdout, "danger ok\n");
    }

    #[tokio::test]
    async fn test_empty_command() {
        let result = permissive_runner().execute("", None).await;
        assert_eq!(result.status, CommandStatus::Error);
    }

    #[tokio::test]
    async fn test_describe_builds_help_command() {
        let result = permissive_runner().describe("echo", None, "--help").await;
        // /bin/echo prints the flag itself; the command must echo back
        assert_eq!(result.command, "echo --help");
    }

    #[tokio::test]
    async fn test_stderr_captured() {
        let result = permissive_runner()
            .execute("sh -c 'echo oops >&2; exit 1'", None)
            .await;
        assert_eq!(result.status, CommandStatus::Error);
        assert_eq!(result.stderr, "oops\n");
    }
}

//! Tool capability abstraction.
//!
//! Every exposed tool implements [`ToolCapability`]: probe availability,
//! probe connectivity, execute, describe. CLI tools shell out through the
//! runner under the active policy; native tools run in-process and take a
//! typed parameter map instead of a command string. The registry depends on
//! the interface only.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::debug;

use kubegate_core::command::CommandResult;
use kubegate_core::config::{ToolEntry, ToolKind};

use crate::runner::CommandRunner;

/// Timeout for availability probes, in seconds.
const CHECK_TIMEOUT: u64 = 10;

/// Timeout for connectivity probes, in seconds.
const CONNECTIVITY_TIMEOUT: u64 = 30;

/// Result of an availability or connectivity probe.
#[derive(Debug, Clone)]
pub struct ToolCheck {
    pub available: bool,
    pub message: String,
    pub version: Option<String>,
}

impl ToolCheck {
    fn ok(message: impl Into<String>, version: Option<String>) -> Self {
        Self {
            available: true,
            message: message.into(),
            version,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            available: false,
            message: message.into(),
            version: None,
        }
    }
}

/// Uniform interface over CLI-backed and in-process tools.
#[async_trait]
pub trait ToolCapability: Send + Sync {
    fn name(&self) -> &str;

    fn entry(&self) -> &ToolEntry;

    fn kind(&self) -> ToolKind {
        self.entry().kind
    }

    fn is_required(&self) -> bool {
        self.entry().required
    }

    /// Probe that the tool exists and responds. Runs without validation and
    /// a 10 second budget.
    async fn check_available(&self) -> ToolCheck;

    /// Probe that the tool can reach its backend. Failure is reported but
    /// never fails startup.
    async fn test_connectivity(&self) -> ToolCheck;

    /// Execute with the filtered argument map from the MCP call.
    async fn execute(&self, arguments: Map<String, Value>) -> CommandResult;

    /// Help text; falls back to the static description when the binary
    /// cannot produce any.
    async fn describe(&self, command: Option<&str>) -> String;

    /// JSON input schema for the `execute_<name>` MCP tool.
    fn execute_schema(&self) -> Value;

    /// JSON input schema for the `describe_<name>` MCP tool.
    fn describe_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Optional subcommand to get help for (e.g. \"get\")"
                }
            }
        })
    }
}

/// A tool backed by an external binary.
pub struct CliTool {
    name: String,
    entry: ToolEntry,
    runner: Arc<CommandRunner>,
}

impl CliTool {
    pub fn new(name: impl Into<String>, entry: ToolEntry, runner: Arc<CommandRunner>) -> Self {
        Self {
            name: name.into(),
            entry,
            runner,
        }
    }

    /// Prefix the tool name when the model omitted it (`get pods` becomes
    /// `kubectl get pods`).
    fn qualify(&self, command: &str) -> String {
        let trimmed = command.trim();
        if trimmed == self.name || trimmed.starts_with(&format!("{} ", self.name)) {
            trimmed.to_string()
        } else {
            format!("{} {}", self.name, trimmed)
        }
    }
}

#[async_trait]
impl ToolCapability for CliTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn entry(&self) -> &ToolEntry {
        &self.entry
    }

    async fn check_available(&self) -> ToolCheck {
        if self.entry.check_cmd.is_empty() {
            return ToolCheck::failed(format!("{}: no check command configured", self.name));
        }

        // Fast path: a binary that is not on PATH cannot pass its check
        if which::which(&self.name).is_err() {
            return ToolCheck::failed(format!(
                "{} binary not found. Ensure it's installed and in PATH",
                self.name
            ));
        }

        let result = self
            .runner
            .execute_unchecked(&self.entry.check_cmd, Some(CHECK_TIMEOUT))
            .await;

        if result.success() {
            let version = Some(result.stdout.trim().chars().take(100).collect::<String>())
                .filter(|v: &String| !v.is_empty());
            ToolCheck::ok(format!("{} is available", self.name), version)
        } else {
            let detail = if result.stderr.is_empty() {
                result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| result.stdout.clone())
            } else {
                result.stderr.clone()
            };
            ToolCheck::failed(format!("{} check failed: {}", self.name, detail.trim()))
        }
    }

    async fn test_connectivity(&self) -> ToolCheck {
        if self.entry.test_cmd.is_empty() {
            return ToolCheck::ok(format!("{}: no connectivity test configured", self.name), None);
        }

        let result = self
            .runner
            .execute_unchecked(&self.entry.test_cmd, Some(CONNECTIVITY_TIMEOUT))
            .await;

        if result.success() {
            ToolCheck::ok(format!("{} connectivity OK", self.name), None)
        } else {
            let detail = if result.stderr.is_empty() {
                result.stdout.clone()
            } else {
                result.stderr.clone()
            };
            ToolCheck::failed(format!(
                "{} connectivity failed: {}",
                self.name,
                detail.trim()
            ))
        }
    }

    async fn execute(&self, arguments: Map<String, Value>) -> CommandResult {
        let Some(command) = arguments.get("command").and_then(Value::as_str) else {
            return CommandResult::error(
                self.name.clone(),
                "missing required argument 'command'",
            );
        };
        let timeout = arguments.get("timeout").and_then(Value::as_u64);

        let qualified = self.qualify(command);
        debug!(tool = %self.name, command = %qualified, "executing tool command");
        self.runner.execute(&qualified, timeout).await
    }

    async fn describe(&self, command: Option<&str>) -> String {
        let result = self
            .runner
            .describe(&self.name, command, &self.entry.help_flag)
            .await;

        if result.success() {
            result.stdout
        } else {
            format!(
                "{}\n\nExample: {}",
                self.entry.description, self.entry.example
            )
        }
    }

    fn execute_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": format!("Full {} command to execute (pipes to whitelisted unix tools supported)", self.name)
                },
                "timeout": {
                    "type": "integer",
                    "description": "Optional timeout in seconds"
                }
            },
            "required": ["command"]
        })
    }
}

/// Handler signature for in-process tools.
pub type NativeHandler =
    Arc<dyn Fn(Map<String, Value>) -> BoxFuture<'static, CommandResult> + Send + Sync>;

/// A tool implemented in-process. Parameters arrive as a typed mapping and
/// are validated upstream against the declared schema; no subprocess is
/// spawned for execution, though probes may still shell out via `check_cmd`.
pub struct NativeTool {
    name: String,
    entry: ToolEntry,
    runner: Arc<CommandRunner>,
    handler: Option<NativeHandler>,
}

impl NativeTool {
    pub fn new(name: impl Into<String>, entry: ToolEntry, runner: Arc<CommandRunner>) -> Self {
        Self {
            name: name.into(),
            entry,
            runner,
            handler: None,
        }
    }

    pub fn with_handler(mut self, handler: NativeHandler) -> Self {
        self.handler = Some(handler);
        self
    }
}

#[async_trait]
impl ToolCapability for NativeTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn entry(&self) -> &ToolEntry {
        &self.entry
    }

    async fn check_available(&self) -> ToolCheck {
        if self.entry.check_cmd.is_empty() {
            // Purely in-process tool with nothing external to probe
            return ToolCheck::ok(format!("{} is available", self.name), None);
        }

        let result = self
            .runner
            .execute_unchecked(&self.entry.check_cmd, Some(CHECK_TIMEOUT))
            .await;
        if result.success() {
            let version = Some(result.stdout.trim().chars().take(100).collect::<String>())
                .filter(|v: &String| !v.is_empty());
            ToolCheck::ok(format!("{} is available", self.name), version)
        } else {
            ToolCheck::failed(format!("{} check failed", self.name))
        }
    }

    async fn test_connectivity(&self) -> ToolCheck {
        if self.entry.test_cmd.is_empty() {
            return ToolCheck::ok(format!("{}: no connectivity test configured", self.name), None);
        }
        let result = self
            .runner
            .execute_unchecked(&self.entry.test_cmd, Some(CONNECTIVITY_TIMEOUT))
            .await;
        if result.success() {
            ToolCheck::ok(format!("{} connectivity OK", self.name), None)
        } else {
            ToolCheck::failed(format!("{} connectivity failed", self.name))
        }
    }

    async fn execute(&self, arguments: Map<String, Value>) -> CommandResult {
        match &self.handler {
            Some(handler) => handler(arguments).await,
            None => CommandResult::error(
                self.name.clone(),
                format!("native tool {} has no handler registered", self.name),
            ),
        }
    }

    async fn describe(&self, _command: Option<&str>) -> String {
        format!(
            "{}\n\nExample: {}",
            self.entry.description, self.entry.example
        )
    }

    fn execute_schema(&self) -> Value {
        if self.entry.parameters.is_empty() {
            return serde_json::json!({"type": "object", "properties": {}});
        }

        let mut properties = Map::new();
        let mut required = Vec::new();

        for (param, spec) in &self.entry.parameters {
            let mut prop = Map::new();
            prop.insert(
                "type".to_string(),
                spec.get("type").cloned().unwrap_or_else(|| "string".into()),
            );
            if let Some(desc) = spec.get("description") {
                prop.insert("description".to_string(), desc.clone());
            }
            if let Some(default) = spec.get("default") {
                prop.insert("default".to_string(), default.clone());
            }
            properties.insert(param.clone(), Value::Object(prop));

            if spec.get("required").and_then(Value::as_bool).unwrap_or(false) {
                required.push(Value::String(param.clone()));
            }
        }

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required
        })
    }
}

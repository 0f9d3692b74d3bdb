//! KubeGate MCP handler.
//!
//! Implements the rmcp `ServerHandler` trait: lists an `execute_<tool>` /
//! `describe_<tool>` pair per available tool, dispatches tool calls through
//! the argument preprocessor into the capability layer, and serves a couple
//! of introspection resources. Every handler returns either a normal result
//! or an MCP error object; command failures travel inside the result with
//! `isError` set, never as protocol errors.

use std::sync::Arc;
use std::time::Instant;

use rmcp::{
    model::*,
    service::RequestContext,
    ErrorData as McpError, RoleServer, ServerHandler,
};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use kubegate_core::command::{CommandResult, CommandStatus};
use kubegate_core::validator::CommandValidator;
use kubegate_exec::tool::ToolCapability;

use crate::metrics::GatewayMetrics;
use crate::registry::{Operation, ToolRegistry};

use super::preprocessor::filter_arguments;

const TOOLS_RESOURCE_URI: &str = "kubegate://tools";
const POLICY_RESOURCE_URI: &str = "kubegate://security/policy";

#[derive(Clone)]
pub struct KubeGateHandler {
    registry: Arc<ToolRegistry>,
    validator: Arc<RwLock<CommandValidator>>,
    metrics: Arc<GatewayMetrics>,
    instructions: String,
}

impl KubeGateHandler {
    pub fn new(
        registry: Arc<ToolRegistry>,
        validator: Arc<RwLock<CommandValidator>>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        let instructions = registry.instructions();
        Self {
            registry,
            validator,
            metrics,
            instructions,
        }
    }

    /// Negotiate the protocol version: use the client's when we support it,
    /// otherwise answer with our maximum.
    fn negotiate_protocol_version(&self, client_version: &str) -> ProtocolVersion {
        let ours = ProtocolVersion::LATEST;
        if client_version > ours.to_string().as_str() {
            debug!(client_version, "client uses newer protocol, negotiating down");
            ours
        } else {
            serde_json::from_value(Value::String(client_version.to_string())).unwrap_or(ours)
        }
    }

    fn build_tool(&self, name: String, description: String, schema: Value, read_only: bool) -> Option<Tool> {
        let schema_map = schema.as_object()?.clone();
        let mut tool = Tool::new(name, description, Arc::new(schema_map));

        let annotations = if read_only {
            serde_json::json!({
                "readOnlyHint": true,
                "destructiveHint": false,
            })
        } else {
            serde_json::json!({
                "readOnlyHint": false,
                "destructiveHint": true,
                "openWorldHint": true,
            })
        };
        tool.annotations = serde_json::from_value(annotations).ok();
        Some(tool)
    }

    /// Render a command result into MCP text content.
    fn render_result(result: &CommandResult) -> (String, bool) {
        match result.status {
            CommandStatus::Success => {
                let mut text = result.stdout.clone();
                if result.truncated {
                    text.push_str("\n... (output truncated)");
                }
                (text, false)
            }
            CommandStatus::Blocked => (
                format!(
                    "Command blocked: {}",
                    result.error_message.as_deref().unwrap_or("security policy")
                ),
                true,
            ),
            CommandStatus::Timeout => (
                result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "command timed out".to_string()),
                true,
            ),
            CommandStatus::Error => {
                let text = match result.exit_code {
                    Some(code) if !result.stderr.is_empty() => {
                        format!("Error (exit code {code}): {}", result.stderr)
                    }
                    Some(code) => format!(
                        "Error (exit code {code}): {}",
                        if result.stdout.is_empty() {
                            result.error_message.as_deref().unwrap_or("command failed")
                        } else {
                            &result.stdout
                        }
                    ),
                    None => result
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "command failed".to_string()),
                };
                (text, true)
            }
        }
    }

    async fn policy_json(&self) -> Value {
        let validator = self.validator.read().await;
        let rules: serde_json::Map<String, Value> = validator
            .rule_counts()
            .into_iter()
            .map(|(tool, (dangerous, safe, regex))| {
                (
                    tool,
                    serde_json::json!({
                        "dangerous_prefixes": dangerous,
                        "safe_patterns": safe,
                        "regex_rules": regex,
                    }),
                )
            })
            .collect();

        serde_json::json!({
            "mode": validator.mode(),
            "allowed_unix_commands": validator
                .allowed_unix_commands()
                .iter()
                .collect::<Vec<_>>(),
            "rules": rules,
        })
    }

    fn status_label(status: CommandStatus) -> &'static str {
        match status {
            CommandStatus::Success => "success",
            CommandStatus::Error => "error",
            CommandStatus::Timeout => "timeout",
            CommandStatus::Blocked => "blocked",
        }
    }
}

impl ServerHandler for KubeGateHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_prompts()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "kubegate".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(self.instructions.clone()),
        }
    }

    async fn initialize(
        &self,
        params: InitializeRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, McpError> {
        let client_version = params.protocol_version.to_string();
        let negotiated = self.negotiate_protocol_version(&client_version);

        debug!(
            client = %params.client_info.name,
            protocol_version = %negotiated,
            "client initializing"
        );

        let info = self.get_info();
        Ok(InitializeResult {
            protocol_version: negotiated,
            capabilities: info.capabilities,
            server_info: info.server_info,
            instructions: info.instructions,
        })
    }

    async fn list_tools(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let mut tools = Vec::new();

        for tool in self.registry.iter() {
            let entry = tool.entry();
            if let Some(execute) = self.build_tool(
                format!("execute_{}", tool.name()),
                format!(
                    "Execute a {} command. {} Example: {}",
                    tool.name(),
                    entry.description,
                    entry.example
                ),
                tool.execute_schema(),
                false,
            ) {
                tools.push(execute);
            }
            if let Some(describe) = self.build_tool(
                format!("describe_{}", tool.name()),
                format!("Get help and documentation for {}", tool.name()),
                tool.describe_schema(),
                true,
            ) {
                tools.push(describe);
            }
        }

        debug!(count = tools.len(), "list_tools");
        Ok(ListToolsResult::with_all_items(tools))
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let mcp_name = params.name.to_string();
        let arguments = params.arguments.unwrap_or_default();

        info!(tool = %mcp_name, "call_tool");

        let schema = self.registry.input_schema(&mcp_name);
        let (arguments, removed) = filter_arguments(schema.as_ref(), arguments, &mcp_name);
        if !removed.is_empty() {
            debug!(tool = %mcp_name, removed = ?removed, "dropped undeclared arguments");
        }

        let Some((operation, tool)) = self.registry.resolve(&mcp_name) else {
            return Err(McpError::invalid_params(
                format!("Unknown tool '{mcp_name}'"),
                None,
            ));
        };

        match operation {
            Operation::Execute => {
                let started = Instant::now();
                let result = tool.execute(arguments).await;
                let elapsed = started.elapsed();

                self.metrics.observe_command(
                    tool.name(),
                    Self::status_label(result.status),
                    elapsed,
                );

                if result.status != CommandStatus::Success {
                    warn!(
                        tool = %tool.name(),
                        status = ?result.status,
                        exit_code = ?result.exit_code,
                        "command did not succeed"
                    );
                }

                let (text, is_error) = Self::render_result(&result);
                Ok(CallToolResult {
                    content: vec![Content::text(text)],
                    structured_content: None,
                    is_error: Some(is_error),
                    meta: None,
                })
            }
            Operation::Describe => {
                let command = arguments.get("command").and_then(Value::as_str);
                let text = tool.describe(command).await;
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
        }
    }

    async fn list_prompts(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        Ok(ListPromptsResult::with_all_items(Vec::new()))
    }

    async fn get_prompt(
        &self,
        params: GetPromptRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, McpError> {
        Err(McpError::invalid_params(
            format!("Prompt '{}' not found", params.name),
            None,
        ))
    }

    async fn list_resources(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let raw = vec![
            serde_json::json!({
                "uri": TOOLS_RESOURCE_URI,
                "name": "Tool catalog",
                "description": "Probed CLI tools this gateway exposes",
                "mimeType": "application/json",
            }),
            serde_json::json!({
                "uri": POLICY_RESOURCE_URI,
                "name": "Security policy",
                "description": "Active validation mode and per-tool rule counts",
                "mimeType": "application/json",
            }),
        ];

        let resources: Vec<Resource> = raw
            .into_iter()
            .filter_map(|json| serde_json::from_value(json).ok())
            .collect();

        Ok(ListResourcesResult::with_all_items(resources))
    }

    async fn read_resource(
        &self,
        params: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let body = match params.uri.as_str() {
            TOOLS_RESOURCE_URI => self.registry.catalog_json(),
            POLICY_RESOURCE_URI => self.policy_json().await,
            other => {
                return Err(McpError::invalid_params(
                    format!("Resource '{other}' not found"),
                    None,
                ));
            }
        };

        let text = serde_json::to_string_pretty(&body)
            .map_err(|e| McpError::internal_error(format!("serialization failed: {e}"), None))?;

        let contents = serde_json::from_value(serde_json::json!([{
            "uri": params.uri,
            "mimeType": "application/json",
            "text": text,
        }]))
        .map_err(|e| McpError::internal_error(format!("resource encoding failed: {e}"), None))?;

        Ok(ReadResourceResult { contents })
    }
}

//! Tool registry.
//!
//! Loads the tool catalog from configuration, probes each entry, and keeps
//! the set of available tools the MCP handler dispatches to. Each available
//! tool surfaces as two MCP tools: `execute_<name>` (destructive,
//! open-world) and `describe_<name>` (read-only).

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tracing::{info, warn};

use kubegate_core::config::{KubeGateConfig, ToolKind};
use kubegate_exec::runner::CommandRunner;
use kubegate_exec::tool::{CliTool, NativeTool, ToolCapability, ToolCheck};

/// Outcome of probing one catalog entry.
#[derive(Debug)]
pub struct ToolProbe {
    pub tool_name: String,
    pub registered: bool,
    pub message: String,
    pub version: Option<String>,
}

/// Outcome of the full discovery pass.
#[derive(Debug, Default)]
pub struct RegistryReport {
    pub registered: Vec<String>,
    pub failed_required: Vec<String>,
    pub skipped_optional: Vec<String>,
    pub probes: Vec<ToolProbe>,
}

impl RegistryReport {
    pub fn success(&self) -> bool {
        self.failed_required.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!(
                "Tool registration: {}",
                if self.success() { "SUCCESS" } else { "FAILED" }
            ),
            format!("  registered: {}", self.registered.len()),
        ];
        for name in &self.registered {
            lines.push(format!("    - {name}"));
        }
        if !self.failed_required.is_empty() {
            lines.push(format!("  failed (required): {}", self.failed_required.len()));
            for name in &self.failed_required {
                lines.push(format!("    - {name}"));
            }
        }
        if !self.skipped_optional.is_empty() {
            lines.push(format!("  skipped (optional): {}", self.skipped_optional.len()));
            for name in &self.skipped_optional {
                lines.push(format!("    - {name}"));
            }
        }
        lines.join("\n")
    }
}

/// Holds the probed tools and the MCP-facing name mapping.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolCapability>>,
    /// Catalog order, for stable tool listings.
    order: Vec<String>,
}

impl ToolRegistry {
    /// Build tools from the catalog and probe them.
    ///
    /// Required tools that fail their availability probe are collected in
    /// the report; the caller decides whether to fail fast. Connectivity
    /// probes only ever warn.
    pub async fn discover(
        config: &KubeGateConfig,
        runner: Arc<CommandRunner>,
        skip_validation: bool,
    ) -> (Self, RegistryReport) {
        let mut registry = Self {
            tools: HashMap::new(),
            order: Vec::new(),
        };
        let mut report = RegistryReport::default();

        for (name, entry) in config.tool_entries() {
            let tool: Arc<dyn ToolCapability> = match entry.kind {
                ToolKind::Cli => Arc::new(CliTool::new(&name, entry, runner.clone())),
                ToolKind::Native => Arc::new(NativeTool::new(&name, entry, runner.clone())),
            };

            let check = if skip_validation {
                ToolCheck {
                    available: true,
                    message: format!("{name}: validation skipped"),
                    version: None,
                }
            } else {
                tool.check_available().await
            };

            if check.available {
                info!(tool = %name, version = ?check.version, "tool available");

                if !skip_validation && !tool.entry().test_cmd.is_empty() {
                    let connectivity = tool.test_connectivity().await;
                    if !connectivity.available {
                        warn!(tool = %name, message = %connectivity.message, "connectivity test failed");
                    }
                }

                report.registered.push(name.clone());
                report.probes.push(ToolProbe {
                    tool_name: name.clone(),
                    registered: true,
                    message: check.message,
                    version: check.version,
                });
                registry.order.push(name.clone());
                registry.tools.insert(name, tool);
            } else if tool.is_required() {
                warn!(tool = %name, message = %check.message, "required tool unavailable");
                report.failed_required.push(name.clone());
                report.probes.push(ToolProbe {
                    tool_name: name,
                    registered: false,
                    message: check.message,
                    version: None,
                });
            } else {
                info!(tool = %name, message = %check.message, "optional tool skipped");
                report.skipped_optional.push(name.clone());
                report.probes.push(ToolProbe {
                    tool_name: name,
                    registered: false,
                    message: check.message,
                    version: None,
                });
            }
        }

        (registry, report)
    }

    /// Fail-fast helper: error with the summary when required tools miss.
    pub fn ensure_required(report: &RegistryReport) -> Result<()> {
        if report.success() {
            Ok(())
        } else {
            anyhow::bail!(
                "required tools not available: {}\n{}",
                report.failed_required.join(", "),
                report.summary()
            )
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolCapability>> {
        self.tools.get(name)
    }

    /// Tools in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ToolCapability>> {
        self.order.iter().filter_map(|name| self.tools.get(name))
    }

    pub fn tool_names(&self) -> &[String] {
        &self.order
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Resolve an MCP tool name (`execute_kubectl`) to the operation and the
    /// backing tool.
    pub fn resolve(&self, mcp_name: &str) -> Option<(Operation, &Arc<dyn ToolCapability>)> {
        if let Some(tool_name) = mcp_name.strip_prefix("execute_") {
            return self.tools.get(tool_name).map(|t| (Operation::Execute, t));
        }
        if let Some(tool_name) = mcp_name.strip_prefix("describe_") {
            return self.tools.get(tool_name).map(|t| (Operation::Describe, t));
        }
        None
    }

    /// Input schema for an MCP tool name, used by the argument preprocessor.
    pub fn input_schema(&self, mcp_name: &str) -> Option<Value> {
        self.resolve(mcp_name).map(|(op, tool)| match op {
            Operation::Execute => tool.execute_schema(),
            Operation::Describe => tool.describe_schema(),
        })
    }

    /// Instructions text for the MCP initialize result.
    pub fn instructions(&self) -> String {
        let mut text = String::from(
            "KubeGate exposes Kubernetes-adjacent CLI tools. Each tool has an \
             execute_<tool> operation taking a command string (pipes into \
             whitelisted unix utilities are supported) and a describe_<tool> \
             operation returning help text. Commands run under a security \
             policy; blocked commands explain which rule fired.\n\nAvailable tools:\n",
        );
        for tool in self.iter() {
            let entry = tool.entry();
            text.push_str(&format!(
                "- {}: {} (example: {})\n",
                tool.name(),
                entry.description,
                entry.example
            ));
        }
        text
    }

    /// Catalog snapshot served as the `kubegate://tools` resource.
    pub fn catalog_json(&self) -> Value {
        let tools: Vec<Value> = self
            .iter()
            .map(|tool| {
                let entry = tool.entry();
                serde_json::json!({
                    "name": tool.name(),
                    "kind": entry.kind,
                    "required": entry.required,
                    "description": entry.description,
                    "example": entry.example,
                })
            })
            .collect();
        serde_json::json!({ "tools": tools })
    }
}

/// The two MCP operations every tool registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Execute,
    Describe,
}

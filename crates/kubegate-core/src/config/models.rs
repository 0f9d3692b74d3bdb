//! Typed configuration models.
//!
//! One section struct per concern; every field has a default so partial
//! overlays stay valid. Cross-field requirements are enforced by
//! [`KubeGateConfig::validate`] after merging.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Transport the MCP server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    StreamableHttp,
    Stdio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            transport: TransportKind::StreamableHttp,
            log_level: "info".to_string(),
        }
    }
}

/// Session storage backend options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    /// In-memory, single instance.
    Memory,
    /// Shared store (Redis), multi-instance.
    Shared,
    /// In-memory behind affinity-guaranteeing routing.
    Sticky,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub backend: SessionBackend,
    pub ttl_seconds: u64,
    pub cleanup_interval_seconds: u64,
    /// Connection URL, required when backend is `shared`.
    pub url: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            backend: SessionBackend::Memory,
            ttl_seconds: 3600,
            cleanup_interval_seconds: 300,
            url: None,
        }
    }
}

/// Event store backend options for protocol resumability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStoreBackend {
    /// Disabled; no resumability support.
    None,
    Memory,
    Shared,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStoreSettings {
    pub backend: EventStoreBackend,
    pub url: Option<String>,
    /// Maximum events retained per session stream.
    pub max_events: usize,
    pub ttl_seconds: u64,
}

impl Default for EventStoreSettings {
    fn default() -> Self {
        Self {
            backend: EventStoreBackend::None,
            url: None,
            max_events: 1000,
            ttl_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    pub default_timeout: u64,
    /// Stdout byte cap applied before decoding.
    pub max_output_size: usize,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            default_timeout: 60,
            max_output_size: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    Strict,
    Permissive,
}

/// One regex rule: pattern, action (`block` or `allow`), optional message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegexRule {
    pub pattern: String,
    #[serde(default = "default_rule_action")]
    pub action: String,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_rule_action() -> String {
    "block".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    pub mode: SecurityMode,
    /// Blocked string prefixes, keyed by tool.
    pub dangerous_commands: HashMap<String, Vec<String>>,
    /// Exceptions that re-allow specific dangerous forms, keyed by tool.
    pub safe_patterns: HashMap<String, Vec<String>>,
    /// Regex rules, keyed by tool.
    pub regex_rules: HashMap<String, Vec<RegexRule>>,
    /// Names permitted as non-first pipe stages.
    pub allowed_unix_commands: Vec<String>,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            mode: SecurityMode::Strict,
            dangerous_commands: HashMap::new(),
            safe_patterns: HashMap::new(),
            regex_rules: HashMap::new(),
            allowed_unix_commands: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// External binary invoked via subprocess.
    Cli,
    /// In-process implementation taking typed parameters.
    Native,
}

impl Default for ToolKind {
    fn default() -> Self {
        Self::Cli
    }
}

/// Catalog entry describing one tool the gateway may expose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEntry {
    #[serde(default)]
    pub kind: ToolKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub check_cmd: String,
    #[serde(default)]
    pub test_cmd: String,
    #[serde(default = "default_help_flag")]
    pub help_flag: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub example: String,
    /// Parameter schema for native tools.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

fn default_help_flag() -> String {
    "--help".to_string()
}

/// Tool catalog, keyed by tool name. Iteration order follows the YAML.
pub type ToolsCatalog = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KubeGateConfig {
    pub server: ServerSettings,
    pub session: SessionSettings,
    pub event_store: EventStoreSettings,
    pub command: CommandSettings,
    pub security: SecuritySettings,
    /// Raw catalog map; decoded per entry so one bad tool does not sink the
    /// whole config.
    pub tools: ToolsCatalog,
}

impl KubeGateConfig {
    /// Enforce cross-field requirements the per-field defaults cannot.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.session.backend == SessionBackend::Shared && self.session.url.is_none() {
            anyhow::bail!("session.url is required when session.backend is 'shared'");
        }
        if self.event_store.backend == EventStoreBackend::Shared && self.event_store.url.is_none() {
            anyhow::bail!("event_store.url is required when event_store.backend is 'shared'");
        }
        if self.command.default_timeout == 0 {
            anyhow::bail!("command.default_timeout must be at least 1 second");
        }
        if self.command.max_output_size < 1000 {
            anyhow::bail!("command.max_output_size must be at least 1000 bytes");
        }
        Ok(())
    }

    /// Decode the tool catalog into typed entries, skipping malformed ones.
    pub fn tool_entries(&self) -> Vec<(String, ToolEntry)> {
        self.tools
            .iter()
            .filter_map(|(name, value)| {
                match serde_json::from_value::<ToolEntry>(value.clone()) {
                    Ok(entry) => Some((name.clone(), entry)),
                    Err(e) => {
                        tracing::warn!(tool = %name, error = %e, "skipping malformed tool entry");
                        None
                    }
                }
            })
            .collect()
    }
}

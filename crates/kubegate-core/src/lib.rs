//! # KubeGate Core
//!
//! Domain types and pure logic for the KubeGate MCP gateway:
//!
//! - `command` - structured command, validation, and execution result types
//! - `parser` - command string parsing and pipe-chain splitting
//! - `validator` - three-layer security validation of parsed commands
//! - `config` - configuration models, embedded defaults, and loading

pub mod command;
pub mod config;
pub mod parser;
pub mod validator;

pub use command::{CommandResult, CommandStatus, ParsedCommand, ValidationResult};
pub use config::{
    load_config, reload_config, CommandSettings, EventStoreBackend, EventStoreSettings,
    KubeGateConfig, SecuritySettings, ServerSettings, SessionBackend, SessionSettings, ToolEntry,
    ToolKind, ToolsCatalog,
};
pub use parser::{is_pipe_command, parse_command, split_pipe_commands, tokenize};
pub use validator::CommandValidator;

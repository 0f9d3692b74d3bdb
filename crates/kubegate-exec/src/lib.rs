//! # KubeGate Exec
//!
//! Subprocess execution for the gateway:
//!
//! - `runner` - validated spawning of single and piped commands with
//!   timeouts, output caps, and guaranteed cleanup
//! - `tool` - the capability interface implemented by CLI-backed and
//!   in-process tools

pub mod runner;
pub mod tool;

pub use runner::CommandRunner;
pub use tool::{CliTool, NativeTool, ToolCapability, ToolCheck};

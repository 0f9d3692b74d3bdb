//! # KubeGate Gateway
//!
//! The MCP-facing layer of KubeGate:
//!
//! - `registry` - tool catalog loading, probing, and handler naming
//! - `mcp` - the rmcp server handler and the argument preprocessor
//! - `server` - HTTP/stdio serving, session and event wiring, lifecycle
//! - `metrics` - Prometheus instrumentation

pub mod mcp;
pub mod metrics;
pub mod registry;
pub mod server;

pub use metrics::GatewayMetrics;
pub use registry::{RegistryReport, ToolRegistry};
pub use server::{GatewayServer, ServerBundle};

//! MCP protocol surface: the rmcp server handler and the tool-call argument
//! preprocessor.

mod handler;
pub mod preprocessor;

pub use handler::KubeGateHandler;

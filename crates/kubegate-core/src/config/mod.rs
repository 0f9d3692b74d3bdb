//! Gateway configuration.
//!
//! Built-in defaults are embedded YAML; a user configuration directory and
//! `KUBEGATE_` environment variables overlay them. Priority, highest first:
//! environment, user files, embedded defaults. Maps merge recursively, other
//! values replace, unknown keys are ignored.

mod loader;
mod models;

pub use loader::{load_config, reload_config};
pub use models::{
    CommandSettings, EventStoreBackend, EventStoreSettings, KubeGateConfig, RegexRule,
    SecurityMode, SecuritySettings, ServerSettings, SessionBackend, SessionSettings, ToolEntry,
    ToolKind, ToolsCatalog, TransportKind,
};

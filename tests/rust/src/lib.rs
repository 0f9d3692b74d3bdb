//! Shared fixtures for KubeGate integration tests.

use std::sync::Arc;

use tokio::sync::RwLock;

use kubegate_core::config::{
    CommandSettings, EventStoreBackend, KubeGateConfig, SecurityMode, SecuritySettings,
};
use kubegate_core::validator::CommandValidator;
use kubegate_exec::runner::CommandRunner;
use kubegate_gateway::server::ServerBundle;

/// A runner that allows everything, for exercising execution behavior.
pub fn permissive_runner() -> Arc<CommandRunner> {
    let security = SecuritySettings {
        mode: SecurityMode::Permissive,
        ..Default::default()
    };
    Arc::new(CommandRunner::new(
        Arc::new(RwLock::new(CommandValidator::new(&security))),
        CommandSettings::default(),
    ))
}

/// A gateway configuration whose only tool is `echo`, probing via echo
/// itself so the catalog registers on any unix host.
pub fn echo_config() -> KubeGateConfig {
    let mut config = KubeGateConfig::default();
    config.server.port = 0;
    config.event_store.backend = EventStoreBackend::Memory;
    config.tools.insert(
        "echo".to_string(),
        serde_json::json!({
            "kind": "cli",
            "required": true,
            "check_cmd": "echo version-0",
            "test_cmd": "",
            "help_flag": "--help",
            "description": "Echo text back",
            "example": "echo hello"
        }),
    );
    config
}

/// Build a bundle around [`echo_config`].
pub async fn echo_bundle() -> ServerBundle {
    ServerBundle::build(echo_config(), None, false)
        .await
        .expect("echo bundle should build")
}

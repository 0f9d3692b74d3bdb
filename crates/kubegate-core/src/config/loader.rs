//! Configuration loading and merging.
//!
//! Sources, lowest priority first: embedded defaults (`defaults/*.yaml`),
//! user files (`config.yaml` and `security.yaml` in the config directory),
//! environment variables. `KUBEGATE_SERVER__PORT=9000` becomes
//! `{server: {port: 9000}}`; values are parsed as YAML scalars so booleans
//! and numbers keep their types.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_yaml::Value;
use tracing::{debug, info, warn};

use super::models::KubeGateConfig;

const DEFAULT_SETTINGS: &str = include_str!("../../defaults/settings.yaml");
const DEFAULT_SECURITY: &str = include_str!("../../defaults/security.yaml");
const DEFAULT_TOOLS: &str = include_str!("../../defaults/tools.yaml");

const ENV_PREFIX: &str = "KUBEGATE_";
const ENV_DELIMITER: &str = "__";

/// Load configuration from defaults, user overlays, and the environment.
pub fn load_config(config_dir: Option<&Path>) -> Result<KubeGateConfig> {
    let mut merged = parse_defaults()?;

    let user_dir = config_dir
        .map(Path::to_path_buf)
        .or_else(default_config_dir);

    if let Some(dir) = user_dir {
        for file in ["config.yaml", "security.yaml"] {
            let path = dir.join(file);
            if let Some(overlay) = load_yaml_file(&path) {
                info!(path = %path.display(), "applying user configuration");
                merged = deep_merge(merged, overlay);
            }
        }
    }

    let env_overrides = env_overrides(std::env::vars());
    if let Some(overrides) = env_overrides {
        merged = deep_merge(merged, overrides);
    }

    let config: KubeGateConfig =
        serde_yaml::from_value(merged).context("configuration does not match the expected shape")?;
    config.validate()?;
    Ok(config)
}

/// Reload configuration, keeping the current one when loading fails.
pub fn reload_config(current: &KubeGateConfig, config_dir: Option<&Path>) -> KubeGateConfig {
    match load_config(config_dir) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "config reload failed, keeping current configuration");
            current.clone()
        }
    }
}

fn parse_defaults() -> Result<Value> {
    let mut merged: Value =
        serde_yaml::from_str(DEFAULT_SETTINGS).context("embedded settings.yaml is invalid")?;
    let security: Value =
        serde_yaml::from_str(DEFAULT_SECURITY).context("embedded security.yaml is invalid")?;
    let tools: Value =
        serde_yaml::from_str(DEFAULT_TOOLS).context("embedded tools.yaml is invalid")?;
    merged = deep_merge(merged, security);
    merged = deep_merge(merged, tools);
    Ok(merged)
}

fn default_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".kubegate"))
}

fn load_yaml_file(path: &Path) -> Option<Value> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_yaml::from_str(&content) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
            None
        }
    }
}

/// Deep merge: mappings recurse, everything else is replaced by `override_`.
fn deep_merge(base: Value, override_: Value) -> Value {
    match (base, override_) {
        (Value::Mapping(mut base_map), Value::Mapping(override_map)) => {
            for (key, value) in override_map {
                let merged = match base_map.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base_map.insert(key, merged);
            }
            Value::Mapping(base_map)
        }
        (_, override_) => override_,
    }
}

/// Build a nested overlay from `KUBEGATE_SECTION__KEY=value` variables.
///
/// Returns `None` when no matching variables exist. Values go through the
/// YAML scalar parser, so `true`, `9000`, and `1.5` keep their types.
fn env_overrides(vars: impl Iterator<Item = (String, String)>) -> Option<Value> {
    let mut root = serde_yaml::Mapping::new();

    for (key, raw_value) in vars {
        let Some(remainder) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let segments: Vec<String> = remainder
            .split(ENV_DELIMITER)
            .map(|s| s.to_lowercase())
            .collect();
        if segments.len() < 2 || segments.iter().any(String::is_empty) {
            warn!(variable = %key, "ignoring malformed override, expected KUBEGATE_SECTION__KEY");
            continue;
        }

        let value: Value =
            serde_yaml::from_str(&raw_value).unwrap_or(Value::String(raw_value.clone()));
        debug!(variable = %key, "environment override applied");

        insert_nested(&mut root, &segments, value);
    }

    if root.is_empty() {
        None
    } else {
        Some(Value::Mapping(root))
    }
}

fn insert_nested(map: &mut serde_yaml::Mapping, path: &[String], value: Value) {
    let key = Value::String(path[0].clone());
    if path.len() == 1 {
        map.insert(key, value);
        return;
    }

    let entry = map
        .entry(key)
        .or_insert_with(|| Value::Mapping(serde_yaml::Mapping::new()));
    if !entry.is_mapping() {
        *entry = Value::Mapping(serde_yaml::Mapping::new());
    }
    if let Value::Mapping(inner) = entry {
        insert_nested(inner, &path[1..], value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{SecurityMode, SessionBackend};

    #[test]
    fn test_embedded_defaults_parse() {
        let config = load_config(Some(Path::new("/nonexistent"))).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.security.mode, SecurityMode::Strict);
        assert!(config.security.dangerous_commands.contains_key("kubectl"));
        assert!(!config.security.allowed_unix_commands.is_empty());
        assert!(config.tools.contains_key("kubectl"));
    }

    #[test]
    fn test_user_overlay_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.yaml"),
            "server:\n  port: 9999\nsession:\n  backend: sticky\n",
        )
        .unwrap();

        let config = load_config(Some(dir.path())).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.session.backend, SessionBackend::Sticky);
        // Untouched sections keep defaults
        assert_eq!(config.command.default_timeout, 60);
    }

    #[test]
    fn test_security_overlay_merges_deeply() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("security.yaml"),
            "security:\n  dangerous_commands:\n    mytool:\n      - \"mytool nuke\"\n",
        )
        .unwrap();

        let config = load_config(Some(dir.path())).unwrap();
        // Default kubectl rules survive the overlay
        assert!(config.security.dangerous_commands.contains_key("kubectl"));
        assert!(config.security.dangerous_commands.contains_key("mytool"));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.yaml"),
            "server:\n  port: 9001\nfuture_section:\n  whatever: true\n",
        )
        .unwrap();

        let config = load_config(Some(dir.path())).unwrap();
        assert_eq!(config.server.port, 9001);
    }

    #[test]
    fn test_env_override_typing() {
        let vars = vec![
            ("KUBEGATE_SERVER__PORT".to_string(), "9000".to_string()),
            (
                "KUBEGATE_SESSION__TTL_SECONDS".to_string(),
                "120".to_string(),
            ),
            ("KUBEGATE_SERVER__HOST".to_string(), "0.0.0.0".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ];

        let overlay = env_overrides(vars.into_iter()).unwrap();
        let server = overlay.get("server").unwrap();
        assert_eq!(
            server.get("port"),
            Some(&Value::Number(serde_yaml::Number::from(9000)))
        );
        assert_eq!(server.get("host"), Some(&Value::String("0.0.0.0".into())));
    }

    #[test]
    fn test_env_override_malformed_key_skipped() {
        let vars = vec![("KUBEGATE_PORT".to_string(), "9000".to_string())];
        assert!(env_overrides(vars.into_iter()).is_none());
    }

    #[test]
    fn test_deep_merge_replaces_scalars_and_lists() {
        let base: Value = serde_yaml::from_str("a:\n  b: 1\n  c: [1, 2]\n").unwrap();
        let over: Value = serde_yaml::from_str("a:\n  c: [3]\n").unwrap();
        let merged = deep_merge(base, over);

        let a = merged.get("a").unwrap();
        assert_eq!(a.get("b"), Some(&Value::Number(1.into())));
        let c = a.get("c").unwrap().as_sequence().unwrap();
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_reload_keeps_previous_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut current = load_config(Some(dir.path())).unwrap();
        current.server.port = 4242;

        // A config that fails cross-field validation
        std::fs::write(
            dir.path().join("config.yaml"),
            "session:\n  backend: shared\n",
        )
        .unwrap();

        let reloaded = reload_config(&current, Some(dir.path()));
        assert_eq!(reloaded.server.port, 4242);
    }
}

//! Tool-call argument preprocessor.
//!
//! Non-standard MCP clients decorate `tools/call` arguments with extra
//! bookkeeping fields (`toolCallId` and friends). Before a handler sees its
//! arguments they are reduced to exactly the keys the tool's input schema
//! declares. Values are never modified, keys are never added, and a missing
//! or malformed schema passes everything through unchanged.

use serde_json::{Map, Value};
use tracing::debug;

/// Filter `arguments` down to the keys declared in `schema.properties`.
///
/// Returns the filtered map and the names of dropped keys. Filtering is
/// idempotent: applying it twice yields the same map as applying it once.
pub fn filter_arguments(
    schema: Option<&Value>,
    arguments: Map<String, Value>,
    tool_name: &str,
) -> (Map<String, Value>, Vec<String>) {
    let Some(allowed) = allowed_keys(schema) else {
        return (arguments, Vec::new());
    };

    let mut filtered = Map::new();
    let mut removed = Vec::new();

    for (key, value) in arguments {
        if allowed.iter().any(|k| k == &key) {
            filtered.insert(key, value);
        } else {
            removed.push(key);
        }
    }

    if !removed.is_empty() {
        debug!(tool = %tool_name, removed = ?removed, "filtered undeclared tool-call arguments");
    }

    (filtered, removed)
}

/// The declared property names, or `None` when the schema is not a
/// well-formed object schema (treated as non-restrictive).
fn allowed_keys(schema: Option<&Value>) -> Option<Vec<String>> {
    let properties = schema?.as_object()?.get("properties")?.as_object()?;
    Some(properties.keys().cloned().collect())
}

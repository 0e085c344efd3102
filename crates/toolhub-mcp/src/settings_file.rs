//! Reading and editing `{"mcpServers": {...}}` settings files.
//!
//! Reads tolerate concurrent external edits by re-reading the whole file
//! each time. Writes are whole-file read-modify-write.

use serde_json::{Map, Value, json};
use std::path::Path;
use toolhub_core::{HubError, Scope};

const SERVERS_KEY: &str = "mcpServers";

pub(crate) fn empty_settings() -> Value {
    json!({ "mcpServers": {} })
}

/// Create the file with an empty server map if it does not exist.
pub(crate) async fn ensure_exists(path: &Path) -> Result<(), HubError> {
    if tokio::fs::try_exists(path).await? {
        return Ok(());
    }
    tracing::info!(path = %path.display(), "Creating MCP settings file");
    write_document(path, &empty_settings()).await
}

/// Rewrite a file whose root is an array as an empty settings document.
///
/// Returns `true` if the file was rewritten.
pub(crate) async fn repair_array_root(path: &Path) -> Result<bool, HubError> {
    let content = tokio::fs::read_to_string(path).await?;
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Array(_)) => {
            tracing::warn!(path = %path.display(), "Settings root is an array; resetting to an empty server map");
            write_document(path, &empty_settings()).await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Load the raw server entries of a settings file, in declared order.
pub(crate) async fn read_servers(path: &Path, scope: Scope) -> Result<Map<String, Value>, HubError> {
    let document = read_document(path, scope).await?;
    servers_of(&document, scope)
}

/// Declared server order, or empty if the file is missing or unreadable.
pub(crate) async fn server_order(path: &Path) -> Vec<String> {
    let Ok(content) = tokio::fs::read_to_string(path).await else {
        return Vec::new();
    };
    serde_json::from_str::<Value>(&content)
        .ok()
        .and_then(|doc| doc.get(SERVERS_KEY)?.as_object().map(|m| m.keys().cloned().collect()))
        .unwrap_or_default()
}

/// A server's `alwaysAllow` list, or empty if anything along the way is missing.
pub(crate) async fn always_allow(path: &Path, name: &str) -> Vec<String> {
    let Ok(content) = tokio::fs::read_to_string(path).await else {
        return Vec::new();
    };
    let Ok(document) = serde_json::from_str::<Value>(&content) else {
        return Vec::new();
    };
    document
        .get(SERVERS_KEY)
        .and_then(|servers| servers.get(name))
        .and_then(|entry| entry.get("alwaysAllow"))
        .and_then(Value::as_array)
        .map(|tools| {
            tools
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Apply `edit` to one server's entry and write the file back.
///
/// The entry always leaves with an `alwaysAllow` array.
pub(crate) async fn update_server(
    path: &Path,
    scope: Scope,
    name: &str,
    edit: impl FnOnce(&mut Map<String, Value>) + Send,
) -> Result<(), HubError> {
    let mut document = read_document(path, scope).await?;
    let entry = document
        .get_mut(SERVERS_KEY)
        .and_then(|servers| servers.get_mut(name))
        .and_then(Value::as_object_mut)
        .ok_or_else(|| HubError::NotConfigured {
            name: name.to_string(),
            scope,
        })?;

    edit(entry);
    entry
        .entry("alwaysAllow")
        .or_insert_with(|| Value::Array(Vec::new()));

    write_document(path, &document).await
}

/// Remove a server entry. Returns `false` if it was not present.
pub(crate) async fn remove_server(path: &Path, scope: Scope, name: &str) -> Result<bool, HubError> {
    let mut document = read_document(path, scope).await?;
    let removed = document
        .get_mut(SERVERS_KEY)
        .and_then(Value::as_object_mut)
        .and_then(|servers| servers.remove(name))
        .is_some();

    if removed {
        write_document(path, &document).await?;
    }
    Ok(removed)
}

async fn read_document(path: &Path, scope: Scope) -> Result<Value, HubError> {
    let content = tokio::fs::read_to_string(path).await?;
    let document: Value = serde_json::from_str(&content).map_err(|e| HubError::ConfigParse {
        scope,
        reason: e.to_string(),
    })?;
    if !document.is_object() {
        return Err(HubError::ConfigParse {
            scope,
            reason: "expected a JSON object with an 'mcpServers' key".to_string(),
        });
    }
    Ok(document)
}

fn servers_of(document: &Value, scope: Scope) -> Result<Map<String, Value>, HubError> {
    match document.get(SERVERS_KEY) {
        None => Ok(Map::new()),
        Some(Value::Object(servers)) => Ok(servers.clone()),
        Some(_) => Err(HubError::ConfigParse {
            scope,
            reason: "mcpServers: Expected object".to_string(),
        }),
    }
}

async fn write_document(path: &Path, document: &Value) -> Result<(), HubError> {
    let mut text = serde_json::to_string_pretty(document)?;
    text.push('\n');
    tokio::fs::write(path, text).await?;
    Ok(())
}

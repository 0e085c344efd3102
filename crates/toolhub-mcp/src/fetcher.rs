//! Capability discovery for connected servers.
//!
//! Each category is fetched independently: a server that does not implement
//! resources still reports its tools.

use std::path::Path;
use toolhub_core::{McpResource, McpResourceTemplate, McpTool};

use crate::client::McpClient;
use crate::settings_file;

#[derive(Debug, Default)]
pub(crate) struct Capabilities {
    pub tools: Vec<McpTool>,
    pub resources: Vec<McpResource>,
    pub resource_templates: Vec<McpResourceTemplate>,
}

/// Fetch tools, resources and resource templates, in that order.
///
/// `settings_path` is the owning scope's settings file, read for the
/// server's `alwaysAllow` list.
pub(crate) async fn fetch_capabilities(
    name: &str,
    client: &McpClient,
    settings_path: Option<&Path>,
) -> Capabilities {
    let tools = fetch_tools(name, client, settings_path).await;

    let resources = client.list_resources().await.unwrap_or_else(|e| {
        tracing::debug!(server_name = %name, error = %e, "Failed to list resources");
        Vec::new()
    });

    let resource_templates = client.list_resource_templates().await.unwrap_or_else(|e| {
        tracing::debug!(server_name = %name, error = %e, "Failed to list resource templates");
        Vec::new()
    });

    tracing::info!(
        server_name = %name,
        tool_count = tools.len(),
        resource_count = resources.len(),
        template_count = resource_templates.len(),
        "Fetched MCP capabilities"
    );

    Capabilities {
        tools,
        resources,
        resource_templates,
    }
}

pub(crate) async fn fetch_tools(
    name: &str,
    client: &McpClient,
    settings_path: Option<&Path>,
) -> Vec<McpTool> {
    let mut tools = match client.list_tools().await {
        Ok(tools) => tools,
        Err(e) => {
            tracing::warn!(server_name = %name, error = %e, "Failed to list tools");
            return Vec::new();
        }
    };

    let allowed = match settings_path {
        Some(path) => settings_file::always_allow(path, name).await,
        None => Vec::new(),
    };
    mark_always_allow(&mut tools, &allowed);
    tools
}

pub(crate) fn mark_always_allow(tools: &mut [McpTool], allowed: &[String]) {
    for tool in tools {
        tool.always_allow = allowed.iter().any(|name| *name == tool.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    #[test]
    fn test_mark_always_allow() {
        let mut tools = vec![McpTool::new("read"), McpTool::new("write")];
        tools[1].always_allow = true;
        mark_always_allow(&mut tools, &["read".to_string()]);
        assert!(tools[0].always_allow);
        assert!(!tools[1].always_allow);
    }

    #[tokio::test]
    async fn test_failed_category_yields_empty_list() {
        let temp = tempdir().unwrap();
        let settings = temp.path().join("mcp_settings.json");
        tokio::fs::write(
            &settings,
            r#"{"mcpServers": {"fs": {"command": "x", "alwaysAllow": ["read_file"]}}}"#,
        )
        .await
        .unwrap();

        let (transport, mut peer) = MemoryTransport::pair();
        tokio::spawn(async move {
            while let Some(message) = peer.recv().await {
                let Some(id) = message.get("id").cloned() else {
                    continue;
                };
                let reply = match message["method"].as_str() {
                    Some("tools/list") => json!({"jsonrpc": "2.0", "id": id, "result": {
                        "tools": [{"name": "read_file"}, {"name": "write_file"}]
                    }}),
                    Some("resources/templates/list") => json!({"jsonrpc": "2.0", "id": id, "result": {
                        "resourceTemplates": [{"uriTemplate": "file:///{path}", "name": "file"}]
                    }}),
                    _ => json!({"jsonrpc": "2.0", "id": id, "error": {
                        "code": -32601, "message": "Method not found"
                    }}),
                };
                peer.send(reply);
            }
        });

        let client = McpClient::new("fs", Arc::new(transport));
        let (tx, _rx) = mpsc::unbounded_channel();
        client.open(tx).await.unwrap();

        let caps = fetch_capabilities("fs", &client, Some(&settings)).await;
        assert_eq!(caps.tools.len(), 2);
        assert!(caps.tools[0].always_allow);
        assert!(!caps.tools[1].always_allow);
        assert!(caps.resources.is_empty());
        assert_eq!(caps.resource_templates.len(), 1);
    }
}

//! List command handler.

use anyhow::Result;
use toolhub_core::McpServer;

use crate::bootstrap::CliContext;
use crate::presentation::print_server_table;

/// Print the current state of every server, in published order.
///
/// `initialize` has already awaited each connection attempt, so the
/// latest snapshot is settled by the time this runs.
pub async fn execute(ctx: &CliContext, all: bool, json: bool) -> Result<()> {
    let servers = visible(ctx.observer.latest(), all);

    if json {
        println!("{}", serde_json::to_string_pretty(&servers)?);
        return Ok(());
    }

    if servers.is_empty() {
        println!("No MCP servers configured.");
        return Ok(());
    }

    println!("Found {} MCP server(s):\n", servers.len());
    print_server_table(&servers);
    Ok(())
}

/// Drop disabled servers unless `all` is set, keeping snapshot order.
fn visible(servers: Vec<McpServer>, all: bool) -> Vec<McpServer> {
    if all {
        servers
    } else {
        servers.into_iter().filter(|s| !s.disabled).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolhub_core::Scope;

    fn names(servers: &[McpServer]) -> Vec<String> {
        servers
            .iter()
            .map(|s| format!("{}:{}", s.source, s.name))
            .collect()
    }

    #[test]
    fn test_visible_keeps_snapshot_order() {
        let project = McpServer::connecting("b", Scope::Project);
        let mut hidden = McpServer::connecting("c", Scope::Global);
        hidden.disabled = true;
        let global = McpServer::connecting("a", Scope::Global);
        let snapshot = vec![project, hidden, global];

        assert_eq!(
            names(&visible(snapshot.clone(), false)),
            vec!["project:b", "global:a"]
        );
        assert_eq!(
            names(&visible(snapshot, true)),
            vec!["project:b", "global:c", "global:a"]
        );
    }

    #[tokio::test]
    async fn test_list_prints_published_snapshot() {
        let temp = tempfile::tempdir().unwrap();
        let config = crate::bootstrap::CliConfig::resolve(
            Some(temp.path().join("settings")),
            None,
        )
        .unwrap();
        let ctx = crate::bootstrap::bootstrap(config).await.unwrap();

        tokio_test::assert_ok!(execute(&ctx, true, true).await);
        assert!(ctx.observer.latest().is_empty());
        ctx.hub.dispose().await;
    }
}

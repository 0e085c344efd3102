//! Read command handler.

use anyhow::Result;
use toolhub_core::Scope;

use crate::bootstrap::CliContext;
use crate::error::CliError;

pub async fn execute(ctx: &CliContext, server: &str, uri: &str, scope: Option<Scope>) -> Result<()> {
    let result = ctx
        .hub
        .read_resource(server, uri, scope)
        .await
        .map_err(CliError::from)?;

    for content in &result.contents {
        match content.get("text").and_then(serde_json::Value::as_str) {
            Some(text) => println!("{text}"),
            None => println!("{}", serde_json::to_string_pretty(content)?),
        }
    }
    Ok(())
}

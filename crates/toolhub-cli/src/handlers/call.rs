//! Call command handler.

use anyhow::Result;
use serde_json::Value;
use toolhub_core::Scope;

use crate::bootstrap::CliContext;
use crate::error::CliError;

pub async fn execute(
    ctx: &CliContext,
    server: &str,
    tool: &str,
    args: Option<&str>,
    scope: Option<Scope>,
) -> Result<()> {
    let arguments = args.map(parse_arguments).transpose()?;

    let result = ctx
        .hub
        .call_tool(server, tool, arguments, scope)
        .await
        .map_err(CliError::from)?;

    let text = result.text();
    if text.is_empty() {
        println!("{}", serde_json::to_string_pretty(&result.content)?);
    } else {
        println!("{text}");
    }

    if result.is_error {
        return Err(CliError::Tool(format!("{server}/{tool}")).into());
    }
    Ok(())
}

/// Tool arguments must be a JSON object.
fn parse_arguments(raw: &str) -> Result<Value, CliError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| CliError::Arguments(format!("--args is not valid JSON: {e}")))?;
    if !value.is_object() {
        return Err(CliError::Arguments(
            "--args must be a JSON object".to_string(),
        ));
    }
    Ok(value)
}

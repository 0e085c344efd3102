//! Validate command handler.
//!
//! Checks a settings file offline with the same validator the hub uses.

use anyhow::Result;
use serde_json::Value;
use std::path::Path;
use toolhub_core::validate_server_config;

use crate::error::CliError;

/// Outcome for one server entry.
#[derive(Debug, PartialEq, Eq)]
pub struct EntryReport {
    pub name: String,
    /// Transport kind on success, validation message on failure.
    pub outcome: Result<&'static str, String>,
}

pub async fn execute(file: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .map_err(|e| CliError::Io(format!("{}: {e}", file.display())))?;
    let reports = validate_document(&content)?;

    if reports.is_empty() {
        println!("{}: no servers configured", file.display());
        return Ok(());
    }

    let mut invalid = 0;
    for report in &reports {
        match &report.outcome {
            Ok(kind) => println!("ok      {} ({kind})", report.name),
            Err(message) => {
                invalid += 1;
                println!("invalid {}: {message}", report.name);
            }
        }
    }

    if invalid > 0 {
        return Err(CliError::Config(format!(
            "{invalid} of {} server entries are invalid",
            reports.len()
        ))
        .into());
    }
    Ok(())
}

/// Validate every entry under `mcpServers`, in file order.
pub fn validate_document(content: &str) -> Result<Vec<EntryReport>, CliError> {
    let document: Value = serde_json::from_str(content)
        .map_err(|e| CliError::Config(format!("Invalid JSON: {e}")))?;
    let servers = match document.get("mcpServers") {
        Some(Value::Object(servers)) => servers,
        None => return Ok(Vec::new()),
        Some(_) => {
            return Err(CliError::Config(
                "'mcpServers' must be an object".to_string(),
            ));
        }
    };

    Ok(servers
        .iter()
        .map(|(name, raw)| EntryReport {
            name: name.clone(),
            outcome: validate_server_config(raw, Some(name))
                .map(|config| config.kind())
                .map_err(|e| e.to_string()),
        })
        .collect())
}

//! Hub error taxonomy.
//!
//! Errors the hub surfaces to callers. Per-connection transport failures are
//! recorded on the connection's error buffer instead and never reach here.

use std::time::Duration;
use thiserror::Error;

use crate::domain::{ConfigValidationError, Scope};
use crate::paths::PathError;

#[derive(Debug, Error)]
pub enum HubError {
    /// A settings file is not valid JSON or not shaped as `{"mcpServers": {...}}`.
    #[error("Invalid {scope} MCP settings format: {reason}")]
    ConfigParse { scope: Scope, reason: String },

    /// A single server entry failed validation.
    #[error(transparent)]
    ConfigValidation(#[from] ConfigValidationError),

    /// Transport could not be opened or failed mid-request.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No live connection matches the requested name.
    #[error("{0}")]
    NotFound(String),

    /// The connection exists but its configuration marks it disabled.
    #[error("{0}")]
    Disabled(String),

    /// The server has no entry in the settings file being edited.
    #[error("Server \"{name}\" not found in {scope} MCP settings")]
    NotConfigured { name: String, scope: Scope },

    /// JSON-RPC failure reported by the server or malformed response.
    #[error("MCP protocol error: {0}")]
    Protocol(String),

    /// A request exceeded the server's configured timeout.
    #[error("Request to MCP server timed out after {0:?}")]
    Timeout(Duration),

    #[error("Timeout must be between {min} and {max} seconds, got {value}")]
    InvalidTimeout { value: u64, min: u64, max: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Path(#[from] PathError),

    /// The host's snapshot observer has been dropped.
    #[error("Host is no longer available")]
    HostUnavailable,

    #[error("MCP hub has been disposed")]
    Disposed,
}

impl HubError {
    /// Lookup failure for `resources/read`.
    pub fn no_connection(name: &str, scope: Option<Scope>) -> Self {
        Self::NotFound(format!(
            "No connection found for server: {name}{}",
            scope_suffix(scope)
        ))
    }

    /// Lookup failure for `tools/call`, with a hint for tool-using agents.
    pub fn no_connection_for_tool(name: &str, scope: Option<Scope>) -> Self {
        Self::NotFound(format!(
            "No connection found for server: {name}{}. Please make sure to use MCP servers available under 'Connected MCP Servers'.",
            scope_suffix(scope)
        ))
    }

    /// Lookup failure for the settings mutators.
    pub fn unknown_server(name: &str, scope: Option<Scope>) -> Self {
        Self::NotFound(format!("Server {name}{} not found", scope_suffix(scope)))
    }

    pub fn disabled(name: &str) -> Self {
        Self::Disabled(format!("Server \"{name}\" is disabled"))
    }

    pub fn disabled_for_tool(name: &str) -> Self {
        Self::Disabled(format!("Server \"{name}\" is disabled and cannot be used"))
    }
}

fn scope_suffix(scope: Option<Scope>) -> String {
    scope.map(|s| format!(" with source {s}")).unwrap_or_default()
}

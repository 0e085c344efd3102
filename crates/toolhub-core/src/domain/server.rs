//! Server records and capability types.
//!
//! These are the shapes published to snapshot observers and returned from
//! the hub's outbound operations. Field names serialize in camelCase to match
//! the on-disk settings files and the MCP wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

/// Maximum length of a connection's accumulated error text.
pub const MAX_ERROR_LENGTH: usize = 1000;

const TRUNCATION_MARKER: &str = "...(error message truncated)";

/// Origin of a server configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// User-level settings file.
    Global,
    /// Per-workspace config file.
    Project,
}

impl Scope {
    /// Scopes in resolution order: project entries shadow global ones.
    pub const PRECEDENCE: [Self; 2] = [Self::Project, Self::Global];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Project => "project",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "project" => Ok(Self::Project),
            other => Err(format!("Unknown scope '{other}' (expected 'global' or 'project')")),
        }
    }
}

/// Externally visible connection state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        })
    }
}

/// A tool advertised by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    /// Set from the owning scope's `alwaysAllow` list, never from the server.
    #[serde(default)]
    pub always_allow: bool,
}

impl McpTool {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: None,
            always_allow: false,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }
}

/// A resource advertised by a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpResource {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A parameterized resource advertised by a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpResourceTemplate {
    pub uri_template: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Result of a `tools/call` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolCallResult {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default)]
    pub is_error: bool,
}

impl McpToolCallResult {
    /// Concatenate the text parts of the result content.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Result of a `resources/read` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpResourceReadResult {
    #[serde(default)]
    pub contents: Vec<Value>,
}

/// Snapshot record for one connection.
///
/// `config` holds the validated configuration serialized as JSON text, so
/// observers see the inferred `type` and applied defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServer {
    pub name: String,
    pub config: String,
    pub status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default)]
    pub tools: Vec<McpTool>,
    #[serde(default)]
    pub resources: Vec<McpResource>,
    #[serde(default)]
    pub resource_templates: Vec<McpResourceTemplate>,
    #[serde(default)]
    pub disabled: bool,
    pub timeout: u64,
    pub source: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<PathBuf>,
}

impl McpServer {
    /// Create a record in the `Connecting` state with no capabilities.
    #[must_use]
    pub fn connecting(name: impl Into<String>, source: Scope) -> Self {
        Self {
            name: name.into(),
            config: String::new(),
            status: ConnectionStatus::Connecting,
            error: String::new(),
            tools: Vec::new(),
            resources: Vec::new(),
            resource_templates: Vec::new(),
            disabled: false,
            timeout: super::DEFAULT_TIMEOUT_SECS,
            source,
            project_path: None,
        }
    }

    /// Append a line to the error buffer, truncating past [`MAX_ERROR_LENGTH`].
    pub fn append_error(&mut self, message: &str) {
        let combined = if self.error.is_empty() {
            message.to_string()
        } else {
            format!("{}\n{message}", self.error)
        };

        self.error = if combined.chars().count() > MAX_ERROR_LENGTH {
            let cut: String = combined.chars().take(MAX_ERROR_LENGTH).collect();
            format!("{cut}{TRUNCATION_MARKER}")
        } else {
            combined
        };
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

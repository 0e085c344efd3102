//! Domain types for MCP server configuration and runtime state.

mod config;
mod server;

pub use config::{
    ConfigValidationError, DEFAULT_TIMEOUT_SECS, FieldIssue, MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS,
    ServerConfig, SseConfig, StdioConfig, TransportConfig, validate_server_config,
};
pub use server::{
    ConnectionStatus, MAX_ERROR_LENGTH, McpResource, McpResourceReadResult, McpResourceTemplate,
    McpServer, McpTool, McpToolCallResult, Scope,
};

//! Core domain types and port definitions for toolhub.
//!
//! This crate holds everything that does not touch a process, a socket or a
//! file watcher: server configuration and its validator, the server records
//! published to observers, the collaborator ports the hub is constructed
//! with, and the shared error taxonomy.
#![deny(unused_crate_dependencies)]

pub mod domain;
pub mod paths;
pub mod ports;

// Re-export commonly used types for convenience
pub use domain::{
    ConfigValidationError, ConnectionStatus, DEFAULT_TIMEOUT_SECS, FieldIssue, MAX_ERROR_LENGTH,
    MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS, McpResource, McpResourceReadResult, McpResourceTemplate,
    McpServer, McpTool, McpToolCallResult, Scope, ServerConfig, SseConfig, StdioConfig,
    TransportConfig, validate_server_config,
};
pub use paths::{
    FsPathProvider, GLOBAL_SETTINGS_FILE, PROJECT_CONFIG_DIR, PROJECT_CONFIG_FILE, PathError,
    default_settings_dir, ensure_directory, global_settings_path, project_config_path,
};
pub use ports::{
    HubError, NoopNotifier, NoopObserver, Notice, NoticeLevel, SettingsPathProvider,
    SnapshotObserver, UserNotifier,
};

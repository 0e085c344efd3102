//! Command-line front end for the toolhub MCP connection hub.
//!
//! `toolhub list`, `watch`, `call` and `read` bootstrap an [`McpHub`]
//! against the user's settings directory (and optionally a workspace);
//! `validate` checks a settings file offline.
//!
//! [`McpHub`]: toolhub_mcp::McpHub
#![deny(unused_crate_dependencies)]

// Used by main.rs binary
use tracing_subscriber as _;

pub mod bootstrap;
pub mod commands;
pub mod error;
pub mod handlers;
pub mod parser;
pub mod presentation;

pub use bootstrap::{CliConfig, CliContext, bootstrap};
pub use commands::Commands;
pub use error::CliError;
pub use parser::Cli;

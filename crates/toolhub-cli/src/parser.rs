//! Main CLI parser and top-level argument handling.

use clap::Parser;
use std::path::PathBuf;

use crate::commands::Commands;

/// Command-line interface for the MCP connection hub.
#[derive(Parser)]
#[command(name = "toolhub")]
#[command(about = "Connect to and inspect configured MCP servers")]
#[command(version)]
pub struct Cli {
    /// Directory holding mcp_settings.json (defaults to the user config dir)
    #[arg(long = "settings-dir", global = true, env = "TOOLHUB_SETTINGS_DIR")]
    pub settings_dir: Option<PathBuf>,

    /// Workspace root whose .toolhub/mcp.json supplies project servers
    #[arg(long = "workspace", global = true)]
    pub workspace: Option<PathBuf>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

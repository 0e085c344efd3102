//! Available subcommands.

use clap::Subcommand;
use std::path::PathBuf;
use toolhub_core::Scope;

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to every configured server and print their state
    List {
        /// Include disabled servers
        #[arg(long)]
        all: bool,
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stay connected, printing every state change until Ctrl-C
    Watch,

    /// Call a tool on a connected server
    Call {
        /// Server name
        server: String,
        /// Tool name
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
        /// Pick the global or project server when both share a name
        #[arg(long)]
        scope: Option<Scope>,
    },

    /// Read a resource from a connected server
    Read {
        /// Server name
        server: String,
        /// Resource URI
        uri: String,
        #[arg(long)]
        scope: Option<Scope>,
    },

    /// Validate every server entry of a settings file without connecting
    Validate {
        /// Path to an mcp_settings.json or .toolhub/mcp.json file
        file: PathBuf,
    },
}

//! CLI bootstrap - the composition root.
//!
//! Wires the hub to the filesystem path provider, a terminal notifier and
//! a snapshot observer that forwards every snapshot to the running command.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use tokio::sync::mpsc;
use toolhub_core::{
    FsPathProvider, McpServer, Notice, NoticeLevel, SnapshotObserver, UserNotifier,
    default_settings_dir,
};
use toolhub_mcp::McpHub;

use crate::error::CliError;

/// Bootstrap configuration for the CLI.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub settings_dir: PathBuf,
    pub workspace: Option<PathBuf>,
}

impl CliConfig {
    /// Resolve defaults for anything not given on the command line.
    pub fn resolve(settings_dir: Option<PathBuf>, workspace: Option<PathBuf>) -> Result<Self> {
        let settings_dir = match settings_dir {
            Some(dir) => dir,
            None => default_settings_dir().map_err(|e| CliError::Config(e.to_string()))?,
        };
        Ok(Self {
            settings_dir,
            workspace,
        })
    }
}

/// Prints notices to stderr so stdout stays machine-readable.
#[derive(Debug, Default)]
pub struct TerminalNotifier;

impl UserNotifier for TerminalNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info => {
                tracing::info!(message = %notice.message, "notice");
                eprintln!("{}", notice.message);
            }
            NoticeLevel::Warning => {
                tracing::warn!(message = %notice.message, "notice");
                eprintln!("warning: {}", notice.message);
            }
            NoticeLevel::Error => {
                tracing::error!(message = %notice.message, "notice");
                eprintln!("error: {}", notice.message);
            }
        }
    }
}

/// Keeps the latest snapshot and forwards each one to a channel.
pub struct ForwardingObserver {
    latest: Mutex<Vec<McpServer>>,
    tx: mpsc::UnboundedSender<Vec<McpServer>>,
}

impl ForwardingObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<McpServer>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                latest: Mutex::new(Vec::new()),
                tx,
            },
            rx,
        )
    }

    pub fn latest(&self) -> Vec<McpServer> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SnapshotObserver for ForwardingObserver {
    fn on_snapshot(&self, servers: &[McpServer]) {
        tracing::debug!(servers = servers.len(), "Snapshot published");
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = servers.to_vec();
        let _ = self.tx.send(servers.to_vec());
    }
}

/// Fully composed context for CLI commands.
///
/// `observer` is the strong handle; the hub only keeps a weak one, so the
/// context must outlive any command that expects snapshots.
pub struct CliContext {
    pub hub: McpHub,
    pub observer: Arc<ForwardingObserver>,
    pub snapshots: mpsc::UnboundedReceiver<Vec<McpServer>>,
}

/// Build the hub and connect every configured server.
pub async fn bootstrap(config: CliConfig) -> Result<CliContext> {
    tracing::debug!(
        settings_dir = %config.settings_dir.display(),
        workspace = ?config.workspace,
        "Bootstrapping toolhub"
    );
    let paths = Arc::new(FsPathProvider::new(config.settings_dir, config.workspace));
    let (observer, snapshots) = ForwardingObserver::new();
    let observer = Arc::new(observer);
    let observer_handle: Arc<dyn SnapshotObserver> = observer.clone();

    let hub = McpHub::new(paths, Arc::new(TerminalNotifier), &observer_handle);
    hub.initialize().await.map_err(CliError::from)?;

    Ok(CliContext {
        hub,
        observer,
        snapshots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_settings_dir_wins() {
        let config = CliConfig::resolve(Some(PathBuf::from("/tmp/x")), None).unwrap();
        assert_eq!(config.settings_dir, PathBuf::from("/tmp/x"));
        assert!(config.workspace.is_none());
    }

    #[test]
    fn test_forwarding_observer_keeps_latest() {
        let (observer, mut rx) = ForwardingObserver::new();
        let server = McpServer::connecting("a", toolhub_core::Scope::Global);
        observer.on_snapshot(std::slice::from_ref(&server));

        assert_eq!(observer.latest(), vec![server.clone()]);
        assert_eq!(rx.try_recv().unwrap(), vec![server]);
    }

    #[tokio::test]
    async fn test_bootstrap_creates_global_settings() {
        let temp = tempfile::tempdir().unwrap();
        let settings = temp.path().join("settings");
        let config = CliConfig::resolve(Some(settings.clone()), None).unwrap();

        let ctx = bootstrap(config).await.unwrap();

        let written = std::fs::read_to_string(settings.join("mcp_settings.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed, serde_json::json!({"mcpServers": {}}));
        assert!(ctx.hub.get_all_servers().await.is_empty());
        ctx.hub.dispose().await;
    }
}

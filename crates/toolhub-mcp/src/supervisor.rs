//! Reconciliation and connection supervision.
//!
//! Keeps the registry in line with the settings files: connects new
//! entries, tears down removed ones, reconnects changed ones and leaves
//! unchanged ones alone. Also owns the per-connection lifecycle task that
//! turns transport events into status and error updates.

use futures_util::future::join_all;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use toolhub_core::{
    ConnectionStatus, HubError, McpServer, Notice, Scope, ServerConfig, validate_server_config,
};

use crate::client::McpClient;
use crate::fetcher;
use crate::hub::HubInner;
use crate::registry::{Connection, ConnectionKey};
use crate::settings_file;
use crate::snapshot::{ScopeOrder, ordered_servers};
use crate::transport::TransportEvent;
use crate::watcher::{self, WatchTrigger};

/// Pause between tearing a connection down and reconnecting it.
pub(crate) const RESTART_DELAY: Duration = Duration::from_millis(500);

/// Close a removed connection, logging rather than failing.
pub(crate) async fn close_connection(conn: Connection) {
    let key = conn.key();
    if let Some(client) = conn.client {
        if let Err(e) = client.close().await {
            tracing::warn!(server = %key, error = %e, "Failed to close MCP connection");
        }
    }
}

/// Stderr lines mentioning INFO are diagnostics, not failures.
fn is_info_line(line: &str) -> bool {
    line.to_ascii_uppercase().contains("INFO")
}

impl HubInner {
    /// Re-read `scope`'s settings file and reconcile against it.
    ///
    /// Also re-arms the scope's settings watch, so a project file that
    /// appears later is picked up. A malformed file is reported and the
    /// current connections are kept. A project file that has gone away
    /// drops every project connection.
    pub(crate) async fn reload_scope(self: &Arc<Self>, scope: Scope) {
        if self.is_disposed() {
            return;
        }
        self.rearm_settings_watch(scope).await;

        let path = match self.settings_path(scope).await {
            Ok(Some(path)) => path,
            Ok(None) => {
                self.cleanup_project_servers().await;
                return;
            }
            Err(e) => {
                tracing::error!(%scope, error = %e, "Failed to locate MCP settings");
                self.user.notify(Notice::error(e.to_string()));
                return;
            }
        };

        // Settings writes hold the same lock.
        let _guard = self.scope_lock(scope).lock().await;
        match settings_file::read_servers(&path, scope).await {
            Ok(entries) => self.reconcile_locked(scope, entries).await,
            Err(e) => {
                tracing::error!(%scope, path = %path.display(), error = %e, "Failed to read MCP settings");
                self.user.notify(Notice::error(e.to_string()));
            }
        }
    }

    /// Bring `scope`'s connections in line with `entries`, then publish.
    pub(crate) async fn reconcile(self: &Arc<Self>, scope: Scope, entries: Map<String, Value>) {
        let _guard = self.scope_lock(scope).lock().await;
        self.reconcile_locked(scope, entries).await;
    }

    /// [`reconcile`](Self::reconcile) for callers already holding the scope lock.
    pub(crate) async fn reconcile_locked(
        self: &Arc<Self>,
        scope: Scope,
        entries: Map<String, Value>,
    ) {
        if self.is_disposed() {
            return;
        }

        let current = self.registry.read().await.names_in(scope);
        for name in current.iter().filter(|name| !entries.contains_key(*name)) {
            let key = ConnectionKey::new(name.as_str(), scope);
            tracing::info!(server = %key, "MCP server removed from settings");
            self.teardown(&key).await;
        }

        let mut pending = Vec::new();
        for (name, raw) in entries {
            let config = match validate_server_config(&raw, Some(&name)) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(server_name = %name, %scope, error = %e, "Invalid MCP server configuration");
                    self.user.notify(Notice::error(format!(
                        "Invalid configuration for MCP server \"{name}\": {e}"
                    )));
                    continue;
                }
            };

            let key = ConnectionKey::new(name.as_str(), scope);
            let unchanged = self
                .registry
                .read()
                .await
                .get(&name, scope)
                .map(|conn| conn.raw == raw);
            match unchanged {
                Some(true) => continue,
                Some(false) => {
                    tracing::info!(server = %key, "MCP server configuration changed");
                    self.teardown(&key).await;
                }
                None => {}
            }

            self.watch_server(&key, &config);
            pending.push(async move {
                if let Err(e) = self.connect(&name, scope, config, raw).await {
                    tracing::warn!(server_name = %name, %scope, error = %e, "Failed to connect to MCP server");
                    self.user.notify(Notice::error(format!(
                        "Failed to connect to MCP server {name}: {e}"
                    )));
                }
            });
        }
        join_all(pending).await;

        self.publish().await;
    }

    /// Register a connection for `name` and bring it up.
    ///
    /// The record is inserted as `Connecting` before anything is opened so
    /// a failed start still shows up, as `Disconnected` with its error.
    pub(crate) async fn connect(
        self: &Arc<Self>,
        name: &str,
        scope: Scope,
        config: ServerConfig,
        raw: Value,
    ) -> Result<(), HubError> {
        if self.is_disposed() {
            return Ok(());
        }
        let key = ConnectionKey::new(name, scope);
        let timeout = Duration::from_secs(config.timeout);

        let mut server = McpServer::connecting(name, scope);
        server.config = config.to_json_string();
        server.disabled = config.disabled;
        server.timeout = config.timeout;
        if scope == Scope::Project {
            server.project_path = self.paths.workspace_root();
        }

        let transport = self.transports.create(name, &config);
        let generation = {
            let mut registry = self.registry.write().await;
            let generation = registry.next_generation();
            let replaced = registry.insert(Connection {
                server,
                config,
                raw,
                client: None,
                generation,
            });
            if let Some(old) = replaced {
                tokio::spawn(close_connection(old));
            }
            generation
        };

        let transport = match transport {
            Ok(transport) => transport,
            Err(e) => {
                let err = HubError::Transport(e.to_string());
                self.mark_failed(&key, generation, &err).await;
                return Err(err);
            }
        };

        let client = Arc::new(McpClient::new(name, transport));
        {
            let mut registry = self.registry.write().await;
            if self.is_disposed() {
                registry.remove(name, scope);
                return Ok(());
            }
            match registry.current_mut(&key, generation) {
                Some(conn) => conn.client = Some(Arc::clone(&client)),
                // Superseded before we got going.
                None => return Ok(()),
            }
        }

        let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();
        self.spawn_lifecycle(key.clone(), generation, lifecycle_rx);

        tracing::debug!(server = %key, transport = client.transport_kind(), "Connecting to MCP server");
        let opened = async {
            client.open(lifecycle_tx).await?;
            client.handshake(timeout).await
        }
        .await;
        if let Err(e) = opened {
            let err = HubError::from(e);
            self.mark_failed(&key, generation, &err).await;
            return Err(err);
        }

        let still_current = {
            let mut registry = self.registry.write().await;
            match registry.current_mut(&key, generation) {
                Some(conn) => {
                    // A transport that already died after the handshake keeps its status.
                    if conn.server.status == ConnectionStatus::Connecting {
                        conn.server.status = ConnectionStatus::Connected;
                        conn.server.error.clear();
                    }
                    true
                }
                None => false,
            }
        };
        if !still_current {
            let _ = client.close().await;
            return Ok(());
        }
        tracing::info!(server = %key, "Connected to MCP server");

        let settings_path = self.settings_path(scope).await.ok().flatten();
        let caps = fetcher::fetch_capabilities(name, &client, settings_path.as_deref()).await;

        let mut registry = self.registry.write().await;
        if let Some(conn) = registry.current_mut(&key, generation) {
            conn.server.tools = caps.tools;
            conn.server.resources = caps.resources;
            conn.server.resource_templates = caps.resource_templates;
        }
        Ok(())
    }

    async fn mark_failed(&self, key: &ConnectionKey, generation: u64, err: &HubError) {
        let mut registry = self.registry.write().await;
        if let Some(conn) = registry.current_mut(key, generation) {
            conn.server.status = ConnectionStatus::Disconnected;
            conn.server.append_error(&err.to_string());
        }
    }

    fn spawn_lifecycle(
        self: &Arc<Self>,
        key: ConnectionKey,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.on_transport_event(&key, generation, event).await;
            }
        });
    }

    async fn on_transport_event(&self, key: &ConnectionKey, generation: u64, event: TransportEvent) {
        let changed = {
            let mut registry = self.registry.write().await;
            let Some(conn) = registry.current_mut(key, generation) else {
                return;
            };
            match event {
                TransportEvent::Stderr(line) => {
                    if is_info_line(&line) {
                        tracing::info!(server = %key, "{line}");
                        false
                    } else {
                        tracing::warn!(server = %key, stderr = %line, "MCP server stderr");
                        conn.server.append_error(&line);
                        conn.server.status == ConnectionStatus::Disconnected
                    }
                }
                TransportEvent::Reconnecting(reason) => {
                    tracing::warn!(server = %key, %reason, "MCP transport reconnecting");
                    conn.server.append_error(&reason);
                    true
                }
                TransportEvent::Error(message) => {
                    tracing::error!(server = %key, error = %message, "MCP transport error");
                    conn.server.status = ConnectionStatus::Disconnected;
                    conn.server.append_error(&message);
                    true
                }
                TransportEvent::Closed => {
                    tracing::info!(server = %key, "MCP transport closed");
                    conn.server.status = ConnectionStatus::Disconnected;
                    true
                }
                TransportEvent::Message(_) => false,
            }
        };
        if changed {
            self.publish().await;
        }
    }

    /// Tear down one connection and reconnect it from its stored entry.
    ///
    /// A no-op once the host's observer is gone.
    pub(crate) async fn restart(
        self: &Arc<Self>,
        name: &str,
        scope: Option<Scope>,
    ) -> Result<(), HubError> {
        if self.is_disposed() {
            return Ok(());
        }
        if let Err(e) = self.snapshots.observer() {
            tracing::debug!(server_name = name, error = %e, "Skipping restart");
            return Ok(());
        }
        let Some(key) = self.resolve_key(name, scope).await else {
            self.publish().await;
            return Ok(());
        };

        let _guard = self.scope_lock(key.scope).lock().await;
        let raw = {
            let mut registry = self.registry.write().await;
            let Some(conn) = registry.get_mut(&key.name, key.scope) else {
                return Ok(());
            };
            conn.server.status = ConnectionStatus::Connecting;
            conn.server.error.clear();
            conn.raw.clone()
        };

        tracing::info!(server = %key, "Restarting MCP server");
        self.user
            .notify(Notice::info(format!("Restarting {name} MCP server...")));
        self.publish().await;

        tokio::select! {
            () = self.shutdown.cancelled() => return Ok(()),
            () = tokio::time::sleep(RESTART_DELAY) => {}
        }

        let removed = self.registry.write().await.remove(&key.name, key.scope);
        if let Some(conn) = removed {
            close_connection(conn).await;
        }

        match validate_server_config(&raw, Some(&key.name)) {
            Ok(config) => match self.connect(&key.name, key.scope, config, raw).await {
                Ok(()) => {
                    self.user
                        .notify(Notice::info(format!("{name} MCP server connected")));
                }
                Err(e) => {
                    tracing::warn!(server = %key, error = %e, "Failed to restart MCP server");
                    self.user.notify(Notice::error(format!(
                        "Failed to restart {name} MCP server connection: {e}"
                    )));
                }
            },
            Err(e) => {
                self.unwatch_server(&key);
                self.user.notify(Notice::error(format!(
                    "Invalid configuration for MCP server \"{name}\": {e}"
                )));
            }
        }

        self.publish().await;
        Ok(())
    }

    /// Drop every project connection, e.g. when the workspace closes.
    pub(crate) async fn cleanup_project_servers(self: &Arc<Self>) {
        let _guard = self.scope_lock(Scope::Project).lock().await;
        let names = self.registry.read().await.names_in(Scope::Project);
        if names.is_empty() {
            return;
        }
        for name in names {
            self.teardown(&ConnectionKey::new(name, Scope::Project)).await;
        }
        tracing::info!("Removed project MCP servers");
        self.publish().await;
    }

    /// Remove a connection along with its watches and close it.
    pub(crate) async fn teardown(&self, key: &ConnectionKey) {
        self.unwatch_server(key);
        let removed = self.registry.write().await.remove(&key.name, key.scope);
        if let Some(conn) = removed {
            close_connection(conn).await;
        }
    }

    /// Push the current ordered snapshot to the observer.
    pub(crate) async fn publish(&self) {
        if self.is_disposed() || self.snapshots.observer().is_err() {
            return;
        }
        let mut order = ScopeOrder::default();
        if let Ok(Some(path)) = self.settings_path(Scope::Project).await {
            order.project = settings_file::server_order(&path).await;
        }
        if let Ok(Some(path)) = self.settings_path(Scope::Global).await {
            order.global = settings_file::server_order(&path).await;
        }

        let servers = {
            let registry = self.registry.read().await;
            ordered_servers(registry.iter(), &order)
        };
        if let Err(e) = self.snapshots.publish(&servers) {
            tracing::debug!(error = %e, "Snapshot dropped");
        }
    }

    /// Where `scope`'s settings watch belongs.
    ///
    /// The global file always exists. For a project it is the config file,
    /// or the `.toolhub` directory itself while that does not exist yet.
    async fn settings_watch_target(&self, scope: Scope) -> Result<Option<PathBuf>, HubError> {
        match scope {
            Scope::Global => self.settings_path(scope).await,
            Scope::Project => {
                let Some(root) = self.paths.workspace_root() else {
                    return Ok(None);
                };
                let path = toolhub_core::project_config_path(&root);
                let dir = path.parent().map_or_else(|| root.clone(), Path::to_path_buf);
                if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
                    Ok(Some(path))
                } else {
                    Ok(Some(dir))
                }
            }
        }
    }

    /// Point `scope`'s settings watch at its current target.
    async fn rearm_settings_watch(&self, scope: Scope) {
        match self.settings_watch_target(scope).await {
            Ok(target) => self.watch_settings(scope, target.as_deref()),
            Err(e) => {
                tracing::warn!(%scope, error = %e, "Failed to resolve settings watch");
            }
        }
    }

    /// Arm, re-arm or drop the watch on `scope`'s settings file.
    fn watch_settings(&self, scope: Scope, path: Option<&Path>) {
        if self.is_disposed() {
            return;
        }
        let mut watches = self.watch_set();
        let Some(path) = path else {
            watches.settings.remove(&scope);
            return;
        };
        if watches
            .settings
            .get(&scope)
            .is_some_and(|watch| watch.path() == path)
        {
            return;
        }
        match watcher::watch_file(path, WatchTrigger::Settings(scope), self.watch_tx.clone()) {
            Ok(watch) => {
                watches.settings.insert(scope, watch);
            }
            Err(e) => {
                tracing::warn!(%scope, path = %path.display(), error = %e, "Failed to watch settings file");
            }
        }
    }

    fn watch_server(&self, key: &ConnectionKey, config: &ServerConfig) {
        let targets = config.watch_targets();
        if targets.is_empty() || self.is_disposed() {
            return;
        }
        let watches: Vec<_> = targets
            .iter()
            .filter_map(|target| {
                watcher::watch_file(target, WatchTrigger::Server(key.clone()), self.watch_tx.clone())
                    .inspect_err(|e| {
                        tracing::warn!(server = %key, path = %target.display(), error = %e, "Failed to watch server file");
                    })
                    .ok()
            })
            .collect();
        self.watch_set().servers.insert(key.clone(), watches);
    }

    fn unwatch_server(&self, key: &ConnectionKey) {
        self.watch_set().servers.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_lines_are_recognised_case_insensitively() {
        assert!(is_info_line("[INFO] server ready"));
        assert!(is_info_line("info: listening"));
        assert!(!is_info_line("Error: cannot find module"));
    }
}

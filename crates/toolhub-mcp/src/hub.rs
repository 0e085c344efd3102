//! The connection hub.
//!
//! [`McpHub`] owns every live MCP connection for the global and project
//! scopes. It keeps them in line with the two settings files, exposes the
//! tool and resource calls, and rewrites the settings files for the
//! host-facing mutators. Reconciliation itself lives in `supervisor`.

use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use toolhub_core::{
    HubError, MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS, McpResourceReadResult, McpServer,
    McpToolCallResult, Notice, Scope, SettingsPathProvider, SnapshotObserver, UserNotifier,
};

use crate::client::McpClient;
use crate::fetcher;
use crate::registry::{ConnectionKey, ConnectionRegistry};
use crate::settings_file;
use crate::snapshot::ChangeNotifier;
use crate::transport::{DefaultTransportFactory, TransportFactory};
use crate::watcher::{self, FileWatch, WatchTrigger};

/// Active OS watches, keyed by what they trigger.
#[derive(Default)]
pub(crate) struct WatchSet {
    pub settings: HashMap<Scope, FileWatch>,
    pub servers: HashMap<ConnectionKey, Vec<FileWatch>>,
}

/// State shared between the hub handle and its background tasks.
///
/// Background tasks hold it weakly so dropping the last [`McpHub`] tears
/// everything down.
pub(crate) struct HubInner {
    pub paths: Arc<dyn SettingsPathProvider>,
    pub user: Arc<dyn UserNotifier>,
    pub snapshots: ChangeNotifier,
    pub transports: Arc<dyn TransportFactory>,
    pub registry: RwLock<ConnectionRegistry>,
    pub watches: Mutex<WatchSet>,
    pub watch_tx: mpsc::UnboundedSender<WatchTrigger>,
    watch_rx: Mutex<Option<mpsc::UnboundedReceiver<WatchTrigger>>>,
    global_lock: tokio::sync::Mutex<()>,
    project_lock: tokio::sync::Mutex<()>,
    disposed: AtomicBool,
    pub shutdown: CancellationToken,
}

impl HubInner {
    /// Serializes reconciliation passes within one scope.
    pub fn scope_lock(&self, scope: Scope) -> &tokio::sync::Mutex<()> {
        match scope {
            Scope::Global => &self.global_lock,
            Scope::Project => &self.project_lock,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn watch_set(&self) -> std::sync::MutexGuard<'_, WatchSet> {
        self.watches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The settings file backing `scope`.
    ///
    /// The global file is created on demand. The project file exists only
    /// when a workspace is open and has one; `None` otherwise.
    pub async fn settings_path(&self, scope: Scope) -> Result<Option<PathBuf>, HubError> {
        match scope {
            Scope::Global => {
                let dir = self.paths.ensure_settings_directory().await?;
                let path = toolhub_core::global_settings_path(&dir);
                settings_file::ensure_exists(&path).await?;
                Ok(Some(path))
            }
            Scope::Project => {
                let Some(root) = self.paths.workspace_root() else {
                    return Ok(None);
                };
                let path = toolhub_core::project_config_path(&root);
                Ok(tokio::fs::try_exists(&path)
                    .await
                    .unwrap_or(false)
                    .then_some(path))
            }
        }
    }

    async fn require_settings_path(&self, scope: Scope) -> Result<PathBuf, HubError> {
        self.settings_path(scope)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("No {scope} MCP settings file")))
    }

    pub async fn resolve_key(&self, name: &str, scope: Option<Scope>) -> Option<ConnectionKey> {
        self.registry
            .read()
            .await
            .resolve(name, scope)
            .map(|c| c.key())
    }

    /// Re-read `key`'s entry from disk into the live connection without
    /// reconnecting.
    ///
    /// Called after the hub writes a settings file itself, so the watcher's
    /// follow-up reconcile sees an unchanged entry.
    async fn adopt_entry(&self, key: &ConnectionKey, path: &Path) {
        let entries = match settings_file::read_servers(path, key.scope).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(server = %key, error = %e, "Failed to re-read settings after write");
                return;
            }
        };
        let Some(raw) = entries.get(&key.name) else {
            return;
        };
        let config = match toolhub_core::validate_server_config(raw, Some(&key.name)) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(server = %key, error = %e, "Updated entry no longer validates");
                return;
            }
        };

        let mut registry = self.registry.write().await;
        if let Some(conn) = registry.get_mut(&key.name, key.scope) {
            conn.server.config = config.to_json_string();
            conn.server.disabled = config.disabled;
            conn.server.timeout = config.timeout;
            conn.raw = raw.clone();
            conn.config = config;
        }
    }

    /// Client and generation of `key`, if it is connected.
    async fn connected_client(&self, key: &ConnectionKey) -> Option<(Arc<McpClient>, u64)> {
        let registry = self.registry.read().await;
        let conn = registry.get(&key.name, key.scope)?;
        if !conn.server.is_connected() {
            return None;
        }
        conn.client.clone().map(|client| (client, conn.generation))
    }
}

/// Manages MCP server connections for a host.
///
/// Cloning is cheap and every clone drives the same connections.
///
/// ```no_run
/// use std::sync::Arc;
/// use toolhub_core::{FsPathProvider, NoopNotifier, NoopObserver, SnapshotObserver};
/// use toolhub_mcp::McpHub;
///
/// # async fn run() -> Result<(), toolhub_core::HubError> {
/// let paths = Arc::new(FsPathProvider::new("/tmp/toolhub/settings", None));
/// let observer: Arc<dyn SnapshotObserver> = Arc::new(NoopObserver);
/// let hub = McpHub::new(paths, Arc::new(NoopNotifier), &observer);
/// hub.initialize().await?;
/// for server in hub.get_servers().await {
///     println!("{} {}", server.name, server.status);
/// }
/// hub.dispose().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct McpHub {
    inner: Arc<HubInner>,
}

impl McpHub {
    /// Create a hub with the default stdio and SSE transports.
    ///
    /// The observer is held weakly: once the host drops it, publishing stops
    /// and restarts become no-ops.
    pub fn new(
        paths: Arc<dyn SettingsPathProvider>,
        notifier: Arc<dyn UserNotifier>,
        observer: &Arc<dyn SnapshotObserver>,
    ) -> Self {
        Self::with_transport_factory(
            paths,
            notifier,
            observer,
            Arc::new(DefaultTransportFactory::new()),
        )
    }

    pub fn with_transport_factory(
        paths: Arc<dyn SettingsPathProvider>,
        notifier: Arc<dyn UserNotifier>,
        observer: &Arc<dyn SnapshotObserver>,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        let (watch_tx, watch_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(HubInner {
                paths,
                user: notifier,
                snapshots: ChangeNotifier::new(observer),
                transports,
                registry: RwLock::new(ConnectionRegistry::default()),
                watches: Mutex::new(WatchSet::default()),
                watch_tx,
                watch_rx: Mutex::new(Some(watch_rx)),
                global_lock: tokio::sync::Mutex::new(()),
                project_lock: tokio::sync::Mutex::new(()),
                disposed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Load both scopes, connect their servers and start watching.
    ///
    /// Fails only when the global settings directory cannot be prepared.
    /// Per-server problems are reported through the notifier.
    pub async fn initialize(&self) -> Result<(), HubError> {
        if self.inner.is_disposed() {
            return Err(HubError::Disposed);
        }
        self.spawn_watch_loop();

        for scope in [Scope::Global, Scope::Project] {
            if let Some(path) = self.inner.settings_path(scope).await? {
                match settings_file::repair_array_root(&path).await {
                    Ok(true) => {
                        tracing::warn!(path = %path.display(), "Replaced array-rooted settings file");
                    }
                    Ok(false) => {}
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to inspect settings file"),
                }
            }
            self.inner.reload_scope(scope).await;
        }

        let connections = self.inner.registry.read().await.len();
        tracing::info!(connections, "MCP hub initialized");
        Ok(())
    }

    fn spawn_watch_loop(&self) {
        let Some(mut rx) = self
            .inner
            .watch_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();

        tokio::spawn(async move {
            loop {
                let batch = tokio::select! {
                    () = shutdown.cancelled() => break,
                    batch = watcher::next_batch(&mut rx, watcher::COALESCE_WINDOW) => batch,
                };
                let Some(batch) = batch else { break };
                let Some(inner) = weak.upgrade() else { break };

                for trigger in batch {
                    match trigger {
                        WatchTrigger::Settings(scope) => {
                            tracing::debug!(%scope, "Settings file changed");
                            inner.reload_scope(scope).await;
                        }
                        WatchTrigger::Server(key) => {
                            tracing::debug!(server = %key, "Watched server file changed");
                            if let Err(e) = inner.restart(&key.name, Some(key.scope)).await {
                                tracing::warn!(server = %key, error = %e, "Watch-triggered restart failed");
                            }
                        }
                    }
                }
            }
            tracing::debug!("Watch loop stopped");
        });
    }

    /// Re-read one scope's settings file and reconcile against it.
    pub async fn reload(&self, scope: Scope) {
        self.inner.reload_scope(scope).await;
    }

    /// Reconcile one scope against an explicit `{name: entry}` map.
    ///
    /// Entries are validated here; invalid ones are reported and skipped.
    pub async fn reconcile(&self, scope: Scope, entries: Map<String, Value>) {
        self.inner.reconcile(scope, entries).await;
    }

    /// The host's workspace changed: reload the project scope and re-arm
    /// its watch.
    pub async fn workspace_folders_changed(&self) {
        self.inner.reload_scope(Scope::Project).await;
    }

    /// Enabled servers, in connection order.
    pub async fn get_servers(&self) -> Vec<McpServer> {
        self.inner
            .registry
            .read()
            .await
            .iter()
            .filter(|c| !c.server.disabled)
            .map(|c| c.server.clone())
            .collect()
    }

    /// Every server, disabled ones included, in connection order.
    pub async fn get_all_servers(&self) -> Vec<McpServer> {
        self.inner
            .registry
            .read()
            .await
            .iter()
            .map(|c| c.server.clone())
            .collect()
    }

    /// Look up one server. Without a scope, project shadows global.
    pub async fn find_server(&self, name: &str, scope: Option<Scope>) -> Option<McpServer> {
        self.inner
            .registry
            .read()
            .await
            .resolve(name, scope)
            .map(|c| c.server.clone())
    }

    pub async fn read_resource(
        &self,
        server_name: &str,
        uri: &str,
        scope: Option<Scope>,
    ) -> Result<McpResourceReadResult, HubError> {
        let client = {
            let registry = self.inner.registry.read().await;
            let conn = registry
                .resolve(server_name, scope)
                .ok_or_else(|| HubError::no_connection(server_name, scope))?;
            if conn.server.disabled {
                return Err(HubError::disabled(server_name));
            }
            conn.client
                .clone()
                .ok_or_else(|| HubError::no_connection(server_name, scope))?
        };
        Ok(client.read_resource(uri).await?)
    }

    /// Invoke a tool, bounded by the server's configured timeout.
    pub async fn call_tool(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: Option<Value>,
        scope: Option<Scope>,
    ) -> Result<McpToolCallResult, HubError> {
        let (client, timeout) = {
            let registry = self.inner.registry.read().await;
            let conn = registry
                .resolve(server_name, scope)
                .ok_or_else(|| HubError::no_connection_for_tool(server_name, scope))?;
            if conn.server.disabled {
                return Err(HubError::disabled_for_tool(server_name));
            }
            let client = conn
                .client
                .clone()
                .ok_or_else(|| HubError::no_connection_for_tool(server_name, scope))?;
            (client, Duration::from_secs(conn.config.timeout))
        };
        tracing::debug!(server_name, tool_name, ?timeout, "Calling MCP tool");
        Ok(client.call_tool(tool_name, arguments, timeout).await?)
    }

    /// Persist `disabled` for a server and refresh its capabilities.
    ///
    /// The connection stays open either way; disabled servers are only
    /// hidden from callers.
    pub async fn toggle_server_disabled(
        &self,
        server_name: &str,
        disabled: bool,
        scope: Option<Scope>,
    ) -> Result<(), HubError> {
        let result = self.set_disabled(server_name, disabled, scope).await;
        if let Err(e) = &result {
            tracing::error!(server_name, disabled, error = %e, "Failed to update server state");
            self.inner.user.notify(Notice::error(format!(
                "Failed to update server state: {e}"
            )));
        }
        result
    }

    async fn set_disabled(
        &self,
        server_name: &str,
        disabled: bool,
        scope: Option<Scope>,
    ) -> Result<(), HubError> {
        let key = self.require_key(server_name, scope).await?;
        let path = self.inner.require_settings_path(key.scope).await?;
        {
            let _guard = self.inner.scope_lock(key.scope).lock().await;
            settings_file::update_server(&path, key.scope, &key.name, |entry| {
                entry.insert("disabled".to_string(), json!(disabled));
            })
            .await?;
            self.inner.adopt_entry(&key, &path).await;
        }

        if let Some((client, generation)) = self.inner.connected_client(&key).await {
            let caps = fetcher::fetch_capabilities(&key.name, &client, Some(&path)).await;
            let mut registry = self.inner.registry.write().await;
            if let Some(conn) = registry.current_mut(&key, generation) {
                conn.server.tools = caps.tools;
                conn.server.resources = caps.resources;
                conn.server.resource_templates = caps.resource_templates;
            }
        }

        self.inner.publish().await;
        Ok(())
    }

    /// Persist a new per-request timeout, in seconds.
    ///
    /// Takes effect for the next call without reconnecting.
    pub async fn update_server_timeout(
        &self,
        server_name: &str,
        timeout: u64,
        scope: Option<Scope>,
    ) -> Result<(), HubError> {
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&timeout) {
            return Err(HubError::InvalidTimeout {
                value: timeout,
                min: MIN_TIMEOUT_SECS,
                max: MAX_TIMEOUT_SECS,
            });
        }

        let result: Result<(), HubError> = async {
            let key = self.require_key(server_name, scope).await?;
            let path = self.inner.require_settings_path(key.scope).await?;
            {
                let _guard = self.inner.scope_lock(key.scope).lock().await;
                settings_file::update_server(&path, key.scope, &key.name, |entry| {
                    entry.insert("timeout".to_string(), json!(timeout));
                })
                .await?;
                self.inner.adopt_entry(&key, &path).await;
            }
            self.inner.publish().await;
            Ok(())
        }
        .await;

        if let Err(e) = &result {
            tracing::error!(server_name, timeout, error = %e, "Failed to update server timeout");
            self.inner.user.notify(Notice::error(format!(
                "Failed to update server timeout: {e}"
            )));
        }
        result
    }

    /// Remove a server's entry from its settings file and tear down its
    /// connection. Other scopes are untouched.
    pub async fn delete_server(&self, server_name: &str, scope: Option<Scope>) -> Result<(), HubError> {
        let key = self.require_key(server_name, scope).await?;
        let path = self.inner.require_settings_path(key.scope).await?;

        let removed = {
            let _guard = self.inner.scope_lock(key.scope).lock().await;
            let removed = settings_file::remove_server(&path, key.scope, &key.name).await?;
            if removed {
                let entries = settings_file::read_servers(&path, key.scope).await?;
                self.inner.reconcile_locked(key.scope, entries).await;
            }
            removed
        };

        if removed {
            tracing::info!(server = %key, "Deleted MCP server");
            self.inner
                .user
                .notify(Notice::info(format!("Deleted MCP server: {server_name}")));
        } else {
            self.inner.user.notify(Notice::warning(format!(
                "Server \"{server_name}\" not found in configuration"
            )));
        }
        Ok(())
    }

    /// Add or remove `tool_name` from a server's `alwaysAllow` list.
    pub async fn toggle_tool_always_allow(
        &self,
        server_name: &str,
        scope: Scope,
        tool_name: &str,
        should_allow: bool,
    ) -> Result<(), HubError> {
        let result = self
            .set_always_allow(server_name, scope, tool_name, should_allow)
            .await;
        if let Err(e) = &result {
            tracing::error!(server_name, tool_name, error = %e, "Failed to update always-allow list");
            self.inner.user.notify(Notice::error(format!(
                "Failed to update always allow settings: {e}"
            )));
        }
        result
    }

    async fn set_always_allow(
        &self,
        server_name: &str,
        scope: Scope,
        tool_name: &str,
        should_allow: bool,
    ) -> Result<(), HubError> {
        let key = self.require_key(server_name, Some(scope)).await?;
        let path = self.inner.require_settings_path(scope).await?;

        let guard = self.inner.scope_lock(scope).lock().await;
        settings_file::update_server(&path, scope, server_name, |entry| {
            let list = entry
                .entry("alwaysAllow")
                .or_insert_with(|| Value::Array(Vec::new()));
            if !list.is_array() {
                *list = Value::Array(Vec::new());
            }
            if let Some(items) = list.as_array_mut() {
                let position = items.iter().position(|v| v.as_str() == Some(tool_name));
                match (should_allow, position) {
                    (true, None) => items.push(json!(tool_name)),
                    (false, Some(index)) => {
                        items.remove(index);
                    }
                    _ => {}
                }
            }
        })
        .await?;
        self.inner.adopt_entry(&key, &path).await;
        drop(guard);

        if let Some((client, generation)) = self.inner.connected_client(&key).await {
            let tools = fetcher::fetch_tools(&key.name, &client, Some(&path)).await;
            let mut registry = self.inner.registry.write().await;
            if let Some(conn) = registry.current_mut(&key, generation) {
                conn.server.tools = tools;
            }
        }

        self.inner.publish().await;
        Ok(())
    }

    /// Tear down and reconnect one server from its stored configuration.
    ///
    /// Connection failures land in the server's error field rather than
    /// the result.
    pub async fn restart_connection(
        &self,
        server_name: &str,
        scope: Option<Scope>,
    ) -> Result<(), HubError> {
        self.inner.restart(server_name, scope).await
    }

    /// Stop watching and close every connection. Idempotent.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.cancel();
        {
            let mut watches = self.inner.watch_set();
            watches.settings.clear();
            watches.servers.clear();
        }

        let connections = self.inner.registry.write().await.drain_all();
        let count = connections.len();
        for conn in connections {
            crate::supervisor::close_connection(conn).await;
        }
        tracing::info!(connections = count, "MCP hub disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    async fn require_key(
        &self,
        server_name: &str,
        scope: Option<Scope>,
    ) -> Result<ConnectionKey, HubError> {
        self.inner
            .resolve_key(server_name, scope)
            .await
            .ok_or_else(|| HubError::unknown_server(server_name, scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_connection;
    use toolhub_core::{FsPathProvider, NoopNotifier, NoopObserver};

    fn hub_in(dir: &Path) -> (McpHub, Arc<dyn SnapshotObserver>) {
        let observer: Arc<dyn SnapshotObserver> = Arc::new(NoopObserver);
        let paths = Arc::new(FsPathProvider::new(dir.join("settings"), None));
        let hub = McpHub::new(paths, Arc::new(NoopNotifier), &observer);
        (hub, observer)
    }

    #[tokio::test]
    async fn test_settings_writes_wait_for_the_scope_lock() {
        let temp = tempfile::tempdir().unwrap();
        let (hub, _observer) = hub_in(temp.path());
        let path = hub.inner.settings_path(Scope::Global).await.unwrap().unwrap();
        tokio::fs::write(&path, r#"{"mcpServers": {"a": {"command": "echo"}}}"#)
            .await
            .unwrap();
        hub.inner
            .registry
            .write()
            .await
            .insert(test_connection("a", Scope::Global, 1));

        let guard = hub.inner.scope_lock(Scope::Global).lock().await;
        let task = tokio::spawn({
            let hub = hub.clone();
            async move { hub.update_server_timeout("a", 30, None).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let untouched = settings_file::read_servers(&path, Scope::Global).await.unwrap();
        assert!(untouched["a"].get("timeout").is_none());

        drop(guard);
        task.await.unwrap().unwrap();

        let written = settings_file::read_servers(&path, Scope::Global).await.unwrap();
        assert_eq!(written["a"]["timeout"], json!(30));
        assert_eq!(hub.find_server("a", None).await.unwrap().timeout, 30);
    }
}

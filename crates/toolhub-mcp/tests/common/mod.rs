//! Shared fixtures for hub integration tests.
//!
//! Servers are simulated in-process: the [`FakeFactory`] hands the hub a
//! [`MemoryTransport`] per connection and drives the other end with a small
//! scripted MCP server whose tools are the stdio config's `args`.

#![allow(dead_code)]

use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use toolhub_core::{
    FsPathProvider, McpServer, Notice, NoticeLevel, ServerConfig, SnapshotObserver,
    TransportConfig, UserNotifier,
};
use toolhub_mcp::protocol::PROTOCOL_VERSION;
use toolhub_mcp::{
    MemoryPeer, MemoryTransport, McpHub, PeerEvents, Transport, TransportError,
    TransportFactory,
};

/// Command that makes [`FakeFactory`] refuse to create a transport.
pub const UNSPAWNABLE: &str = "does-not-exist";

/// One transport handed out by the factory.
pub struct Spawned {
    pub name: String,
    pub closed: CancellationToken,
    pub events: PeerEvents,
}

#[derive(Default)]
pub struct FakeFactory {
    spawned: Mutex<Vec<Spawned>>,
}

impl FakeFactory {
    pub fn spawn_count(&self, name: &str) -> usize {
        self.spawned
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.name == name)
            .count()
    }

    pub fn closed_count(&self, name: &str) -> usize {
        self.spawned
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.name == name && s.closed.is_cancelled())
            .count()
    }

    pub fn total_spawned(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    /// Event handle of the most recent transport created for `name`.
    pub fn events(&self, name: &str) -> PeerEvents {
        self.spawned
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| s.name == name)
            .map(|s| s.events.clone())
            .unwrap_or_else(|| panic!("no transport spawned for {name}"))
    }
}

impl TransportFactory for FakeFactory {
    fn create(
        &self,
        name: &str,
        config: &ServerConfig,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let tools = match &config.transport {
            TransportConfig::Stdio(stdio) if stdio.command == UNSPAWNABLE => {
                return Err(TransportError::Spawn(format!(
                    "{UNSPAWNABLE}: command not found"
                )));
            }
            TransportConfig::Stdio(stdio) => stdio.args.clone(),
            TransportConfig::Sse(_) => Vec::new(),
        };

        let (transport, peer) = MemoryTransport::pair();
        self.spawned.lock().unwrap().push(Spawned {
            name: name.to_string(),
            closed: peer.closed_token(),
            events: peer.events(),
        });
        tokio::spawn(serve(peer, tools));
        Ok(Arc::new(transport))
    }
}

/// Minimal MCP server: answers the handshake, lists `tools`, echoes calls.
async fn serve(mut peer: MemoryPeer, tools: Vec<String>) {
    while let Some(message) = peer.recv().await {
        let (Some(id), Some(method)) = (message.get("id").cloned(), message["method"].as_str())
        else {
            continue;
        };
        let reply = match method {
            "initialize" => ok(&id, json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {}, "resources": {}},
                "serverInfo": {"name": "fake", "version": "0.1.0"}
            })),
            "tools/list" => ok(&id, json!({
                "tools": tools
                    .iter()
                    .map(|name| json!({"name": name, "inputSchema": {"type": "object"}}))
                    .collect::<Vec<_>>()
            })),
            "resources/list" => ok(&id, json!({
                "resources": [{"uri": "mem://readme", "name": "readme", "mimeType": "text/plain"}]
            })),
            "tools/call" => {
                let tool = message["params"]["name"].as_str().unwrap_or_default();
                ok(&id, json!({
                    "content": [{"type": "text", "text": format!("called {tool}")}]
                }))
            }
            "resources/read" => ok(&id, json!({
                "contents": [{"uri": message["params"]["uri"], "text": "hello"}]
            })),
            other => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("Method not found: {other}")}
            }),
        };
        peer.send(reply);
    }
}

fn ok(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.notices()
            .into_iter()
            .filter(|n| n.level == NoticeLevel::Error)
            .map(|n| n.message)
            .collect()
    }
}

impl UserNotifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    snapshots: Mutex<Vec<Vec<McpServer>>>,
}

impl RecordingObserver {
    pub fn count(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }

    pub fn last(&self) -> Vec<McpServer> {
        self.snapshots
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default()
    }

    /// `(name, scope)` of the latest snapshot, in published order.
    pub fn last_keys(&self) -> Vec<(String, String)> {
        self.last()
            .into_iter()
            .map(|s| (s.name, s.source.to_string()))
            .collect()
    }
}

impl SnapshotObserver for RecordingObserver {
    fn on_snapshot(&self, servers: &[McpServer]) {
        self.snapshots.lock().unwrap().push(servers.to_vec());
    }
}

/// Poll `check` until it holds, for up to ten seconds of real time.
///
/// File watches are driven by the OS, so tests relying on them cannot run
/// on a paused clock.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check().await
}

pub fn write_settings(path: &Path, servers: Value) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let document = json!({"mcpServers": servers});
    std::fs::write(path, serde_json::to_string_pretty(&document).unwrap()).unwrap();
}

pub fn read_settings(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

/// A hub over a temporary settings directory and workspace.
pub struct Fixture {
    pub temp: TempDir,
    pub factory: Arc<FakeFactory>,
    pub notifier: Arc<RecordingNotifier>,
    pub observer: Arc<RecordingObserver>,
    observer_handle: Arc<dyn SnapshotObserver>,
    pub hub: McpHub,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_notifier(Arc::new(RecordingNotifier::default()))
    }

    pub fn with_notifier(notifier: Arc<RecordingNotifier>) -> Self {
        Self::build(Arc::clone(&notifier) as Arc<dyn UserNotifier>, notifier)
    }

    /// Build with any notifier; `recording` only backs the fixture accessors.
    pub fn build(user: Arc<dyn UserNotifier>, recording: Arc<RecordingNotifier>) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let paths = Arc::new(FsPathProvider::new(
            temp.path().join("settings"),
            Some(temp.path().join("workspace")),
        ));
        std::fs::create_dir_all(temp.path().join("workspace")).unwrap();

        let factory = Arc::new(FakeFactory::default());
        let observer = Arc::new(RecordingObserver::default());
        let observer_handle: Arc<dyn SnapshotObserver> = observer.clone();
        let hub = McpHub::with_transport_factory(
            paths,
            user,
            &observer_handle,
            Arc::clone(&factory) as Arc<dyn TransportFactory>,
        );

        Self {
            temp,
            factory,
            notifier: recording,
            observer,
            observer_handle,
            hub,
        }
    }

    pub fn global_path(&self) -> PathBuf {
        self.temp.path().join("settings").join("mcp_settings.json")
    }

    pub fn project_path(&self) -> PathBuf {
        self.temp
            .path()
            .join("workspace")
            .join(".toolhub")
            .join("mcp.json")
    }

    /// Drop the host's observer handle, as if the host went away.
    pub fn detach_observer(&mut self) {
        let replacement = Arc::new(RecordingObserver::default());
        self.observer_handle = replacement.clone() as Arc<dyn SnapshotObserver>;
        self.observer = replacement;
    }
}

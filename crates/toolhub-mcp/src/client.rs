//! MCP JSON-RPC client over a [`Transport`].
//!
//! Requests are correlated with responses through a pending map keyed by
//! request ID; a dispatcher task owns the transport's event stream, resolves
//! responses, answers server-initiated pings and forwards every other
//! lifecycle event to the caller.

use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use toolhub_core::{
    HubError, McpResource, McpResourceReadResult, McpResourceTemplate, McpTool,
    McpToolCallResult,
};

use crate::protocol::{
    self, Incoming, InitializeResult, JsonRpcError, ListResourceTemplatesResult,
    ListResourcesResult, ListToolsResult, METHOD_NOT_FOUND, RequestId,
};
use crate::transport::{EventSink, Transport, TransportError, TransportEvent};

/// Errors that can occur during MCP client operations.
#[derive(Debug, Error)]
pub enum McpClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("MCP error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("Invalid response from MCP server: {0}")]
    InvalidResponse(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection closed")]
    Closed,
}

impl From<McpClientError> for HubError {
    fn from(err: McpClientError) -> Self {
        match err {
            McpClientError::Transport(e) => Self::Transport(e.to_string()),
            McpClientError::Timeout(d) => Self::Timeout(d),
            McpClientError::Closed => Self::Transport("Connection closed".to_string()),
            other @ (McpClientError::Server { .. } | McpClientError::InvalidResponse(_)) => {
                Self::Protocol(other.to_string())
            }
        }
    }
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, JsonRpcError>>>>>;

/// Client for one MCP server connection.
pub struct McpClient {
    name: String,
    transport: Arc<dyn Transport>,
    pending: Pending,
    next_id: AtomicU64,
}

impl McpClient {
    pub fn new(name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            transport,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn transport_kind(&self) -> &'static str {
        self.transport.kind()
    }

    /// Open the transport and start dispatching.
    ///
    /// Stderr, reconnect, error and close events are forwarded to
    /// `lifecycle` in arrival order, including those raised before the
    /// handshake.
    pub async fn open(&self, lifecycle: EventSink) -> Result<(), McpClientError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.transport.open(events_tx).await?;

        tokio::spawn(dispatch(
            self.name.clone(),
            events_rx,
            Arc::clone(&self.pending),
            Arc::downgrade(&self.transport),
            lifecycle,
        ));
        Ok(())
    }

    /// Run the `initialize` exchange over an open transport.
    pub async fn handshake(&self, timeout: Duration) -> Result<InitializeResult, McpClientError> {
        let result = self
            .request("initialize", Some(protocol::initialize_params()), Some(timeout))
            .await?;
        let init: InitializeResult = decode(result)?;

        self.transport
            .send(protocol::notification("notifications/initialized"))
            .await?;

        tracing::debug!(
            server_name = %self.name,
            protocol_version = ?init.protocol_version,
            server_info = ?init.server_info.as_ref().map(|info| &info.name),
            "MCP handshake complete"
        );
        Ok(init)
    }

    pub async fn list_tools(&self) -> Result<Vec<McpTool>, McpClientError> {
        let result: ListToolsResult = decode(self.request("tools/list", None, None).await?)?;
        Ok(result.tools)
    }

    pub async fn list_resources(&self) -> Result<Vec<McpResource>, McpClientError> {
        let result: ListResourcesResult =
            decode(self.request("resources/list", None, None).await?)?;
        Ok(result.resources)
    }

    pub async fn list_resource_templates(
        &self,
    ) -> Result<Vec<McpResourceTemplate>, McpClientError> {
        let result: ListResourceTemplatesResult =
            decode(self.request("resources/templates/list", None, None).await?)?;
        Ok(result.resource_templates)
    }

    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Option<Value>,
        timeout: Duration,
    ) -> Result<McpToolCallResult, McpClientError> {
        let params = json!({
            "name": tool_name,
            "arguments": arguments.unwrap_or_else(|| json!({})),
        });
        decode(self.request("tools/call", Some(params), Some(timeout)).await?)
    }

    pub async fn read_resource(&self, uri: &str) -> Result<McpResourceReadResult, McpClientError> {
        decode(
            self.request("resources/read", Some(json!({"uri": uri})), None)
                .await?,
        )
    }

    /// Close the transport and fail every in-flight request.
    pub async fn close(&self) -> Result<(), McpClientError> {
        fail_pending(&self.pending);
        self.transport.close().await?;
        Ok(())
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, McpClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);

        if let Err(e) = self
            .transport
            .send(protocol::request(id, method, params))
            .await
        {
            self.forget(id);
            return Err(e.into());
        }

        let outcome = match timeout {
            Some(limit) => {
                if let Ok(outcome) = tokio::time::timeout(limit, rx).await {
                    outcome
                } else {
                    self.forget(id);
                    tracing::warn!(server_name = %self.name, method, ?limit, "MCP request timed out");
                    return Err(McpClientError::Timeout(limit));
                }
            }
            None => rx.await,
        };

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(McpClientError::Server {
                code: error.code,
                message: error.message,
            }),
            Err(_) => Err(McpClientError::Closed),
        }
    }

    fn forget(&self, id: u64) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, McpClientError> {
    serde_json::from_value(value).map_err(|e| McpClientError::InvalidResponse(e.to_string()))
}

fn fail_pending(pending: &Pending) {
    // Dropping the senders wakes every waiter with `Closed`.
    pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}

async fn dispatch(
    name: String,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    pending: Pending,
    transport: Weak<dyn Transport>,
    lifecycle: EventSink,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Message(value) => {
                // The client owns the transport; once it is gone nobody is listening.
                let Some(transport) = transport.upgrade() else {
                    break;
                };
                handle_message(&name, value, &pending, transport.as_ref()).await;
            }
            TransportEvent::Closed => {
                fail_pending(&pending);
                let _ = lifecycle.send(TransportEvent::Closed);
            }
            other => {
                let _ = lifecycle.send(other);
            }
        }
    }
    fail_pending(&pending);
}

async fn handle_message(name: &str, value: Value, pending: &Pending, transport: &dyn Transport) {
    match Incoming::from_value(value) {
        Some(Incoming::Response {
            id: RequestId::Number(id),
            result,
        }) => {
            let waiter = pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(result);
                }
                None => tracing::debug!(server_name = %name, id, "Response for unknown request"),
            }
        }
        Some(Incoming::Response { id, .. }) => {
            tracing::debug!(server_name = %name, ?id, "Response with non-numeric id");
        }
        Some(Incoming::Request { id, method, .. }) => {
            let reply = if method == "ping" {
                protocol::result_response(&id, json!({}))
            } else {
                protocol::error_response(
                    &id,
                    METHOD_NOT_FOUND,
                    &format!("Method not found: {method}"),
                )
            };
            if let Err(e) = transport.send(reply).await {
                tracing::debug!(server_name = %name, %method, error = %e, "Failed to answer server request");
            }
        }
        Some(Incoming::Notification { method, .. }) => {
            tracing::trace!(server_name = %name, %method, "MCP notification");
        }
        None => tracing::debug!(server_name = %name, "Ignoring malformed JSON-RPC message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryPeer, MemoryTransport};

    /// Answer every request from `peer` with `respond(method, params)`.
    fn serve(
        mut peer: MemoryPeer,
        respond: impl Fn(&str, &Value) -> Option<Value> + Send + 'static,
    ) -> tokio::task::JoinHandle<MemoryPeer> {
        tokio::spawn(async move {
            while let Some(message) = peer.recv().await {
                let (Some(id), Some(method)) = (message.get("id"), message["method"].as_str())
                else {
                    continue;
                };
                if let Some(result) = respond(method, &message["params"]) {
                    peer.send(json!({"jsonrpc": "2.0", "id": id, "result": result}));
                }
            }
            peer
        })
    }

    async fn open_client(transport: MemoryTransport) -> (McpClient, mpsc::UnboundedReceiver<TransportEvent>) {
        let client = McpClient::new("test", Arc::new(transport));
        let (tx, rx) = mpsc::unbounded_channel();
        client.open(tx).await.unwrap();
        (client, rx)
    }

    #[tokio::test]
    async fn test_handshake_and_list_tools() {
        let (transport, peer) = MemoryTransport::pair();
        serve(peer, |method, _| match method {
            "initialize" => Some(json!({
                "protocolVersion": protocol::PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "fake", "version": "1.0"}
            })),
            "tools/list" => Some(json!({"tools": [{"name": "echo"}, {"name": "add"}]})),
            _ => None,
        });

        let (client, _lifecycle) = open_client(transport).await;
        let init = client.handshake(Duration::from_secs(5)).await.unwrap();
        assert_eq!(init.server_info.unwrap().name, "fake");

        let tools = client.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "add"]);
    }

    #[tokio::test]
    async fn test_server_error_is_surfaced() {
        let (transport, mut peer) = MemoryTransport::pair();
        tokio::spawn(async move {
            while let Some(message) = peer.recv().await {
                if let Some(id) = message.get("id") {
                    peer.send(json!({
                        "jsonrpc": "2.0", "id": id,
                        "error": {"code": -32602, "message": "Unknown tool"}
                    }));
                }
            }
        });

        let (client, _lifecycle) = open_client(transport).await;
        let err = client
            .call_tool("nope", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, McpClientError::Server { code: -32602, .. }));
        let hub: HubError = err.into();
        assert!(matches!(hub, HubError::Protocol(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_tool_times_out() {
        let (transport, peer) = MemoryTransport::pair();
        // Never answers.
        let _server = serve(peer, |_, _| None);

        let (client, _lifecycle) = open_client(transport).await;
        let err = client
            .call_tool("slow", None, Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(matches!(err, McpClientError::Timeout(d) if d == Duration::from_secs(3)));
        assert!(client.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_answers_ping_and_forwards_lifecycle() {
        let (transport, mut peer) = MemoryTransport::pair();
        let (client, mut lifecycle) = open_client(transport).await;

        peer.send(json!({"jsonrpc": "2.0", "id": "p1", "method": "ping"}));
        let reply = peer.recv().await.unwrap();
        assert_eq!(reply["id"], "p1");
        assert_eq!(reply["result"], json!({}));

        peer.send(json!({"jsonrpc": "2.0", "id": 9, "method": "sampling/createMessage"}));
        let reply = peer.recv().await.unwrap();
        assert_eq!(reply["error"]["code"], METHOD_NOT_FOUND);

        peer.stderr("boom");
        assert_eq!(
            lifecycle.recv().await,
            Some(TransportEvent::Stderr("boom".to_string()))
        );
        drop(client);
    }

    #[tokio::test]
    async fn test_close_fails_in_flight_requests() {
        let (transport, peer) = MemoryTransport::pair();
        let _server = serve(peer, |_, _| None);

        let (client, _lifecycle) = open_client(transport).await;
        let client = Arc::new(client);
        let waiter = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.list_resources().await })
        };
        tokio::task::yield_now().await;
        while client.pending.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }

        client.close().await.unwrap();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(McpClientError::Closed)));
    }

    #[tokio::test]
    async fn test_read_resource() {
        let (transport, peer) = MemoryTransport::pair();
        serve(peer, |method, params| {
            (method == "resources/read").then(|| {
                json!({"contents": [{"uri": params["uri"], "text": "data"}]})
            })
        });

        let (client, _lifecycle) = open_client(transport).await;
        let result = client.read_resource("file:///a").await.unwrap();
        assert_eq!(result.contents[0]["uri"], "file:///a");
    }
}

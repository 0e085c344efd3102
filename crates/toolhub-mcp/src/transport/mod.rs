//! Transports that carry JSON-RPC messages to and from an MCP server.
//!
//! # Lifecycle contract
//!
//! Connecting is two explicit phases:
//!
//! 1. **Open**: [`Transport::open`] starts the subprocess or event stream and
//!    begins delivering [`TransportEvent`]s to the supplied sink. Diagnostic
//!    output a server writes before the handshake (stderr, early errors) is
//!    therefore never lost.
//! 2. **Handshake**: the client exchanges `initialize` over the already-open
//!    transport.
//!
//! `open` is idempotent. A second call on an open transport is a no-op and
//! returns `Ok(())`, so the handshake layer may call it unconditionally.

mod memory;
mod sse;
mod stdio;

pub use memory::{MemoryPeer, MemoryTransport, PeerEvents};
pub use sse::{SseEvent, SseEventParser, SseTransport, reconnect_delay};
pub use stdio::StdioTransport;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use toolhub_core::{ServerConfig, TransportConfig};

/// Something a transport observed, delivered in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A decoded JSON-RPC message from the server.
    Message(Value),
    /// One line of the server process's standard error.
    Stderr(String),
    /// The stream dropped and a reconnect is scheduled. Status is unaffected.
    Reconnecting(String),
    /// Unrecoverable transport failure.
    Error(String),
    /// The server side went away.
    Closed,
}

/// Receiving side is owned by the client; transports only ever send.
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

/// Errors returned directly from transport calls.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to spawn MCP server process: {0}")]
    Spawn(String),

    #[error("Failed to connect to MCP server: {0}")]
    Connect(String),

    #[error("Failed to send message: {0}")]
    Send(String),

    #[error("Transport is not open")]
    NotOpen,
}

/// A bidirectional JSON-RPC channel to one server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short label for logs (`stdio`, `sse`).
    fn kind(&self) -> &'static str;

    /// Phase one of the lifecycle. See the module docs.
    async fn open(&self, events: EventSink) -> Result<(), TransportError>;

    async fn send(&self, message: Value) -> Result<(), TransportError>;

    /// Release the process or stream. Safe to call more than once.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Builds a transport for a validated server configuration.
///
/// The hub takes this as a dependency so tests can substitute in-memory
/// transports.
pub trait TransportFactory: Send + Sync {
    fn create(&self, name: &str, config: &ServerConfig)
    -> Result<Arc<dyn Transport>, TransportError>;
}

/// Subprocess transports for `stdio` configs, event streams for `sse`.
#[derive(Debug, Clone, Default)]
pub struct DefaultTransportFactory {
    http: reqwest::Client,
}

impl DefaultTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(
        &self,
        name: &str,
        config: &ServerConfig,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(match &config.transport {
            TransportConfig::Stdio(stdio) => Arc::new(StdioTransport::new(name, stdio.clone())),
            TransportConfig::Sse(sse) => {
                Arc::new(SseTransport::new(name, sse.clone(), self.http.clone()))
            }
        })
    }
}

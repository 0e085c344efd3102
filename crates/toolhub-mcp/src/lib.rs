//! MCP connection supervision for toolhub.
//!
//! [`McpHub`] keeps one connection per configured server in the global and
//! project settings files, reconnects servers whose configuration changes,
//! restarts servers whose watched files change and publishes an ordered
//! snapshot to the host after every state change.
//!
//! Transports are pluggable through [`TransportFactory`]; stdio child
//! processes and SSE endpoints are provided, plus an in-process
//! [`MemoryTransport`] for embedding and tests.
#![deny(unused_crate_dependencies)]

// Used by the integration tests under tests/
#[cfg(test)]
use mockall as _;
#[cfg(test)]
use tokio_test as _;

mod client;
mod fetcher;
mod hub;
pub mod protocol;
mod registry;
mod settings_file;
mod snapshot;
mod supervisor;
pub mod transport;
mod watcher;

pub use client::{McpClient, McpClientError};
pub use hub::McpHub;
pub use registry::ConnectionKey;
pub use transport::{
    DefaultTransportFactory, EventSink, MemoryPeer, MemoryTransport, PeerEvents, SseTransport,
    StdioTransport, Transport, TransportError, TransportEvent, TransportFactory,
};

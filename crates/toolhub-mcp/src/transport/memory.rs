//! In-process transport for servers that live in the same process.
//!
//! [`MemoryTransport::pair`] returns the client half and a [`MemoryPeer`]
//! the embedded server drives.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::{EventSink, Transport, TransportError, TransportEvent};

pub struct MemoryTransport {
    to_peer: mpsc::UnboundedSender<Value>,
    from_peer: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    opened: AtomicBool,
    closed: CancellationToken,
}

/// Server side of a [`MemoryTransport`].
pub struct MemoryPeer {
    incoming: mpsc::UnboundedReceiver<Value>,
    outgoing: mpsc::UnboundedSender<TransportEvent>,
    closed: CancellationToken,
}

/// Cloneable source of transport lifecycle events for a [`MemoryPeer`].
#[derive(Clone)]
pub struct PeerEvents {
    outgoing: mpsc::UnboundedSender<TransportEvent>,
}

impl PeerEvents {
    /// Emit a line as if written to the server's standard error.
    pub fn stderr(&self, line: impl Into<String>) -> bool {
        self.outgoing
            .send(TransportEvent::Stderr(line.into()))
            .is_ok()
    }

    /// Report an unrecoverable transport failure.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.outgoing
            .send(TransportEvent::Error(message.into()))
            .is_ok()
    }

    pub fn hang_up(&self) -> bool {
        self.outgoing.send(TransportEvent::Closed).is_ok()
    }
}

impl MemoryTransport {
    pub fn pair() -> (Self, MemoryPeer) {
        let (to_peer, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_peer) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        (
            Self {
                to_peer,
                from_peer: Mutex::new(Some(from_peer)),
                opened: AtomicBool::new(false),
                closed: closed.clone(),
            },
            MemoryPeer {
                incoming,
                outgoing,
                closed,
            },
        )
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn open(&self, events: EventSink) -> Result<(), TransportError> {
        if self.opened.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut from_peer = self
            .from_peer
            .lock()
            .await
            .take()
            .ok_or(TransportError::NotOpen)?;
        let closed = self.closed.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = closed.cancelled() => break,
                    event = from_peer.recv() => match event {
                        Some(event) => {
                            if events.send(event).is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = events.send(TransportEvent::Closed);
                            break;
                        }
                    },
                }
            }
        });
        Ok(())
    }

    async fn send(&self, message: Value) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::NotOpen);
        }
        self.to_peer
            .send(message)
            .map_err(|_| TransportError::Send("Peer has gone away".to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.cancel();
        Ok(())
    }
}

impl MemoryPeer {
    /// Next message from the client, or `None` once the client closed.
    pub async fn recv(&mut self) -> Option<Value> {
        tokio::select! {
            () = self.closed.cancelled() => None,
            message = self.incoming.recv() => message,
        }
    }

    pub fn send(&self, message: Value) -> bool {
        self.outgoing.send(TransportEvent::Message(message)).is_ok()
    }

    /// Handle for emitting lifecycle events while the peer is busy serving.
    pub fn events(&self) -> PeerEvents {
        PeerEvents {
            outgoing: self.outgoing.clone(),
        }
    }

    pub fn stderr(&self, line: impl Into<String>) -> bool {
        self.events().stderr(line)
    }

    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.events().fail(message)
    }

    pub fn hang_up(&self) -> bool {
        self.events().hang_up()
    }

    /// Whether the client side called [`Transport::close`].
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when the client side closes.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_messages_flow_both_ways() {
        let (transport, mut peer) = MemoryTransport::pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.open(tx).await.unwrap();

        transport.send(json!({"id": 1})).await.unwrap();
        assert_eq!(peer.recv().await, Some(json!({"id": 1})));

        assert!(peer.stderr("warming up"));
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Stderr("warming up".to_string()))
        );
    }

    #[tokio::test]
    async fn test_close_is_visible_to_peer() {
        let (transport, mut peer) = MemoryTransport::pair();
        let (tx, _rx) = mpsc::unbounded_channel();
        transport.open(tx).await.unwrap();

        assert!(!peer.is_closed());
        transport.close().await.unwrap();
        assert!(peer.is_closed());
        assert_eq!(peer.recv().await, None);
        assert!(transport.send(json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_event_handle_reaches_client() {
        let (transport, peer) = MemoryTransport::pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.open(tx).await.unwrap();

        let events = peer.events();
        assert!(events.fail("socket reset"));
        assert!(peer.hang_up());
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Error("socket reset".to_string()))
        );
        assert_eq!(rx.recv().await, Some(TransportEvent::Closed));
    }

    #[tokio::test]
    async fn test_dropped_peer_closes_stream() {
        let (transport, peer) = MemoryTransport::pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.open(tx).await.unwrap();

        drop(peer);
        assert_eq!(rx.recv().await, Some(TransportEvent::Closed));
    }
}

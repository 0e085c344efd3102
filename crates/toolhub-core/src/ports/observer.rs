//! Snapshot observer port.

use crate::domain::McpServer;

/// Receives the full, ordered list of servers every time it changes.
///
/// The hub holds its observer weakly: once the host drops the last strong
/// reference, publishing becomes a no-op.
///
/// # Example
///
/// ```rust
/// use toolhub_core::{McpServer, SnapshotObserver};
///
/// struct CountingObserver;
///
/// impl SnapshotObserver for CountingObserver {
///     fn on_snapshot(&self, servers: &[McpServer]) {
///         println!("{} servers", servers.len());
///     }
/// }
/// ```
pub trait SnapshotObserver: Send + Sync {
    fn on_snapshot(&self, servers: &[McpServer]);
}

/// Ignores every snapshot.
#[derive(Debug, Clone, Default)]
pub struct NoopObserver;

impl SnapshotObserver for NoopObserver {
    fn on_snapshot(&self, _servers: &[McpServer]) {}
}

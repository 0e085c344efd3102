//! Ordered snapshots and their delivery to the host's observer.

use std::sync::{Arc, Weak};
use toolhub_core::{HubError, McpServer, Scope, SnapshotObserver};

use crate::registry::Connection;

/// Declared server order of each scope's settings file.
#[derive(Debug, Default)]
pub(crate) struct ScopeOrder {
    pub project: Vec<String>,
    pub global: Vec<String>,
}

impl ScopeOrder {
    fn position(&self, server: &McpServer) -> (u8, usize) {
        let (rank, names) = match server.source {
            Scope::Project => (0, &self.project),
            Scope::Global => (1, &self.global),
        };
        let index = names
            .iter()
            .position(|name| *name == server.name)
            .unwrap_or(usize::MAX);
        (rank, index)
    }
}

/// Project servers first, then global; each in declared order.
///
/// Servers missing from their file's order keep registry insertion order
/// after the declared ones (the sort is stable).
pub(crate) fn ordered_servers<'a>(
    connections: impl Iterator<Item = &'a Connection>,
    order: &ScopeOrder,
) -> Vec<McpServer> {
    let mut servers: Vec<McpServer> = connections.map(|c| c.server.clone()).collect();
    servers.sort_by_key(|server| order.position(server));
    servers
}

/// Pushes full snapshots to an observer held without ownership.
pub(crate) struct ChangeNotifier {
    observer: Weak<dyn SnapshotObserver>,
}

impl ChangeNotifier {
    pub fn new(observer: &Arc<dyn SnapshotObserver>) -> Self {
        Self {
            observer: Arc::downgrade(observer),
        }
    }

    /// The host's observer, or [`HubError::HostUnavailable`] once it is gone.
    pub fn observer(&self) -> Result<Arc<dyn SnapshotObserver>, HubError> {
        self.observer.upgrade().ok_or(HubError::HostUnavailable)
    }

    /// Deliver a snapshot to the observer.
    pub fn publish(&self, servers: &[McpServer]) -> Result<(), HubError> {
        self.observer()?.on_snapshot(servers);
        Ok(())
    }
}

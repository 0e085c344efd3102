//! In-memory connection registry.
//!
//! Connections are kept in insertion order and identified by the pair
//! (name, scope). A global and a project server may share a name.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use toolhub_core::{McpServer, Scope, ServerConfig};

use crate::client::McpClient;

/// Identity of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub name: String,
    pub scope: Scope,
}

impl ConnectionKey {
    pub fn new(name: impl Into<String>, scope: Scope) -> Self {
        Self {
            name: name.into(),
            scope,
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.scope)
    }
}

/// A live connection: its published record plus runtime handles.
pub(crate) struct Connection {
    pub server: McpServer,
    pub config: ServerConfig,
    /// Entry exactly as read from the settings file, for change detection.
    pub raw: Value,
    pub client: Option<Arc<McpClient>>,
    /// Distinguishes this connection from earlier ones with the same key,
    /// so late events from a torn-down transport are ignored.
    pub generation: u64,
}

impl Connection {
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey::new(self.server.name.clone(), self.server.source)
    }

    fn matches(&self, name: &str, scope: Scope) -> bool {
        self.server.name == name && self.server.source == scope
    }
}

#[derive(Default)]
pub(crate) struct ConnectionRegistry {
    connections: Vec<Connection>,
    next_generation: u64,
}

impl ConnectionRegistry {
    pub fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Add a connection at the end, returning any it replaced.
    pub fn insert(&mut self, connection: Connection) -> Option<Connection> {
        let replaced = self.remove(&connection.server.name, connection.server.source);
        self.connections.push(connection);
        replaced
    }

    pub fn remove(&mut self, name: &str, scope: Scope) -> Option<Connection> {
        let index = self.connections.iter().position(|c| c.matches(name, scope))?;
        Some(self.connections.remove(index))
    }

    pub fn get(&self, name: &str, scope: Scope) -> Option<&Connection> {
        self.connections.iter().find(|c| c.matches(name, scope))
    }

    pub fn get_mut(&mut self, name: &str, scope: Scope) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|c| c.matches(name, scope))
    }

    /// The connection for `key`, only if it is still the given generation.
    pub fn current_mut(&mut self, key: &ConnectionKey, generation: u64) -> Option<&mut Connection> {
        self.get_mut(&key.name, key.scope)
            .filter(|c| c.generation == generation)
    }

    /// Look up by name; without a scope, project shadows global.
    pub fn resolve(&self, name: &str, scope: Option<Scope>) -> Option<&Connection> {
        match scope {
            Some(scope) => self.get(name, scope),
            None => Scope::PRECEDENCE
                .iter()
                .find_map(|scope| self.get(name, *scope)),
        }
    }

    pub fn names_in(&self, scope: Scope) -> Vec<String> {
        self.connections
            .iter()
            .filter(|c| c.server.source == scope)
            .map(|c| c.server.name.clone())
            .collect()
    }

    pub fn drain_all(&mut self) -> Vec<Connection> {
        std::mem::take(&mut self.connections)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
pub(crate) fn test_connection(name: &str, scope: Scope, generation: u64) -> Connection {
    let raw = serde_json::json!({"command": "echo"});
    let config = toolhub_core::validate_server_config(&raw, Some(name)).unwrap();
    let mut server = McpServer::connecting(name, scope);
    server.config = config.to_json_string();
    Connection {
        server,
        config,
        raw,
        client: None,
        generation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_name_in_both_scopes_coexists() {
        let mut registry = ConnectionRegistry::default();
        registry.insert(test_connection("x", Scope::Global, 1));
        registry.insert(test_connection("x", Scope::Project, 2));

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.resolve("x", None).unwrap().server.source,
            Scope::Project
        );
        assert_eq!(
            registry.resolve("x", Some(Scope::Global)).unwrap().server.source,
            Scope::Global
        );
    }

    #[test]
    fn test_resolve_falls_back_to_global() {
        let mut registry = ConnectionRegistry::default();
        registry.insert(test_connection("only-global", Scope::Global, 1));
        assert!(registry.resolve("only-global", None).is_some());
        assert!(registry.resolve("only-global", Some(Scope::Project)).is_none());
    }

    #[test]
    fn test_insert_replaces_same_key() {
        let mut registry = ConnectionRegistry::default();
        registry.insert(test_connection("a", Scope::Global, 1));
        registry.insert(test_connection("b", Scope::Global, 2));
        let replaced = registry.insert(test_connection("a", Scope::Global, 3));

        assert_eq!(replaced.unwrap().generation, 1);
        assert_eq!(registry.len(), 2);
        let names: Vec<_> = registry.iter().map(|c| c.server.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let mut registry = ConnectionRegistry::default();
        registry.insert(test_connection("a", Scope::Global, 5));
        let key = ConnectionKey::new("a", Scope::Global);

        assert!(registry.current_mut(&key, 4).is_none());
        assert!(registry.current_mut(&key, 5).is_some());
    }

    #[test]
    fn test_remove_only_touches_one_scope() {
        let mut registry = ConnectionRegistry::default();
        registry.insert(test_connection("x", Scope::Global, 1));
        registry.insert(test_connection("x", Scope::Project, 2));

        registry.remove("x", Scope::Global);
        assert_eq!(registry.names_in(Scope::Project), vec!["x".to_string()]);
        assert!(registry.names_in(Scope::Global).is_empty());
    }
}

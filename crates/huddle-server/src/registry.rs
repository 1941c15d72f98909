//! Connection registry: which live connections exist, and which of them
//! belong to each user identity.
//!
//! One identity may hold several connections at once (one per browser tab).
//! Anonymous connections are counted but never appear in the presence index.

use std::collections::{HashMap, HashSet};

use huddle_shared::types::ConnectionId;

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Every live connection and the identity it was opened with.
    connections: HashMap<ConnectionId, Option<String>>,
    /// Presence index. An identity is present iff its set is non-empty.
    by_identity: HashMap<String, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection. The identity is fixed for the connection's
    /// lifetime; registering the same id twice keeps the first identity.
    pub fn register(&mut self, connection: ConnectionId, identity: Option<&str>) {
        let identity = identity.filter(|id| !id.is_empty());
        if self.connections.contains_key(&connection) {
            return;
        }
        self.connections
            .insert(connection, identity.map(str::to_string));

        if let Some(identity) = identity {
            self.by_identity
                .entry(identity.to_string())
                .or_default()
                .insert(connection);
        }
    }

    /// Forget a connection. Returns the identity it belonged to, if any.
    pub fn unregister(&mut self, connection: ConnectionId) -> Option<String> {
        let identity = self.connections.remove(&connection)??;

        if let Some(set) = self.by_identity.get_mut(&identity) {
            set.remove(&connection);
            if set.is_empty() {
                self.by_identity.remove(&identity);
            }
        }
        Some(identity)
    }

    pub fn identity_of(&self, connection: ConnectionId) -> Option<&str> {
        self.connections.get(&connection)?.as_deref()
    }

    pub fn connections_for(&self, identity: &str) -> HashSet<ConnectionId> {
        self.by_identity.get(identity).cloned().unwrap_or_default()
    }

    /// Distinct identities with at least one live connection.
    pub fn identity_count(&self) -> usize {
        self.by_identity.len()
    }

    /// Transport connections, not unique users.
    pub fn total_connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn all_connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.connections.keys().copied()
    }
}

//! The hub owns all live-connection state: the registry, room membership,
//! and each connection's outbound queue, behind one lock.
//!
//! Sends go to bounded per-connection queues drained by that connection's
//! writer task, so nothing here awaits socket I/O while the lock is held.
//! Delivery is best effort: a connection whose queue is full misses the event.

use std::collections::HashMap;
use std::sync::Arc;

use huddle_shared::constants::GENERAL_ROOM;
use huddle_shared::error::RoomError;
use huddle_shared::protocol::{DmReady, ServerEvent};
use huddle_shared::room::derive_dm_room;
use huddle_shared::types::ConnectionId;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::registry::ConnectionRegistry;
use crate::rooms::RoomMembership;

/// Events queued per connection before further sends to it are dropped.
pub const OUTBOX_CAPACITY: usize = 256;

pub type Outbox = mpsc::Receiver<ServerEvent>;

struct HubState {
    registry: ConnectionRegistry,
    rooms: RoomMembership,
    outboxes: HashMap<ConnectionId, mpsc::Sender<ServerEvent>>,
}

impl Default for HubState {
    fn default() -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            rooms: RoomMembership::new(),
            outboxes: HashMap::new(),
        }
    }
}

impl HubState {
    fn send(&self, connection: ConnectionId, event: ServerEvent) -> bool {
        let Some(tx) = self.outboxes.get(&connection) else {
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                debug!(
                    connection = %connection.short(),
                    event = event.name(),
                    "Dropping event for slow connection"
                );
                false
            }
            // The writer is gone; cleanup follows on disconnect.
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn send_many(
        &self,
        targets: impl IntoIterator<Item = ConnectionId>,
        event: &ServerEvent,
    ) -> usize {
        targets
            .into_iter()
            .filter(|target| self.send(*target, event.clone()))
            .count()
    }

    fn broadcast_count(&self) {
        let count = self.registry.total_connection_count();
        let event = ServerEvent::UserCount(count);
        self.send_many(self.registry.all_connections(), &event);
    }
}

#[derive(Clone, Default)]
pub struct Hub {
    state: Arc<Mutex<HubState>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly opened connection, subscribe it to the general room,
    /// and publish the new connection count to everyone.
    pub async fn connect(&self, identity: Option<String>) -> (ConnectionId, Outbox) {
        let connection = ConnectionId::new();
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);

        let mut state = self.state.lock().await;
        state.outboxes.insert(connection, tx);
        state.registry.register(connection, identity.as_deref());
        state.rooms.join(connection, GENERAL_ROOM);
        state.broadcast_count();

        info!(
            connection = %connection.short(),
            identity = identity.as_deref().unwrap_or("anonymous"),
            total = state.registry.total_connection_count(),
            "Connection opened"
        );

        (connection, rx)
    }

    /// Remove a connection from presence and every room, then publish the
    /// new count. Safe to call more than once.
    pub async fn disconnect(&self, connection: ConnectionId) {
        let mut state = self.state.lock().await;
        if state.outboxes.remove(&connection).is_none() {
            return;
        }
        let identity = state.registry.unregister(connection);
        let rooms = state.rooms.leave_all(connection);
        state.broadcast_count();

        info!(
            connection = %connection.short(),
            identity = identity.as_deref().unwrap_or("anonymous"),
            rooms = rooms.len(),
            total = state.registry.total_connection_count(),
            "Connection closed"
        );
    }

    pub async fn identity_of(&self, connection: ConnectionId) -> Option<String> {
        let state = self.state.lock().await;
        state.registry.identity_of(connection).map(str::to_string)
    }

    /// Open (or re-open) the DM room between the requester's identity and
    /// `target`. Every live connection of the target is joined too, and
    /// `dm_ready` goes to the requester plus all of the target's connections.
    ///
    /// A target with no live connections still gets a room; they are not
    /// told about it later.
    pub async fn start_dm(
        &self,
        requester: ConnectionId,
        target: Option<&str>,
    ) -> Result<DmReady, RoomError> {
        let mut state = self.state.lock().await;
        let requester_identity = state
            .registry
            .identity_of(requester)
            .unwrap_or_default()
            .to_string();
        let target = target.map(str::trim).unwrap_or_default();
        let room = derive_dm_room(&requester_identity, target)?;

        state.rooms.join(requester, &room);
        let target_connections = state.registry.connections_for(target);
        for connection in &target_connections {
            state.rooms.join(*connection, &room);
        }

        let ready = DmReady {
            room_id: room.clone(),
            members: vec![requester_identity.clone(), target.to_string()],
        };
        let event = ServerEvent::DmReady(ready.clone());
        state.send(requester, event.clone());
        let delivered = state.send_many(
            target_connections.into_iter().filter(|c| *c != requester),
            &event,
        );

        info!(
            room = %room,
            requester = %requester_identity,
            target = %target,
            target_connections = delivered,
            "DM room ready"
        );

        Ok(ready)
    }

    /// Send to one connection.
    pub async fn send_to(&self, connection: ConnectionId, event: ServerEvent) -> bool {
        self.state.lock().await.send(connection, event)
    }

    /// Fan out to a room, skipping `origin` when given. Returns the number of
    /// connections the event was queued for.
    pub async fn broadcast_room(
        &self,
        room: &str,
        origin: Option<ConnectionId>,
        event: ServerEvent,
    ) -> usize {
        let state = self.state.lock().await;
        let targets = match origin {
            Some(origin) => state.rooms.members_excluding(room, origin),
            None => state.rooms.members(room),
        };
        let delivered = state.send_many(targets, &event);
        debug!(room, event = event.name(), delivered, "Room broadcast");
        delivered
    }

    /// Fan out to every live connection regardless of room.
    pub async fn broadcast_all(&self, origin: Option<ConnectionId>, event: ServerEvent) -> usize {
        let state = self.state.lock().await;
        let targets: Vec<ConnectionId> = state
            .registry
            .all_connections()
            .filter(|c| Some(*c) != origin)
            .collect();
        let delivered = state.send_many(targets, &event);
        debug!(event = event.name(), delivered, "Global broadcast");
        delivered
    }

    pub async fn stats(&self) -> HubStats {
        let state = self.state.lock().await;
        HubStats {
            connections: state.registry.total_connection_count(),
            identities: state.registry.identity_count(),
            rooms: state.rooms.room_count(),
        }
    }

    #[cfg(test)]
    pub async fn is_member(&self, connection: ConnectionId, room: &str) -> bool {
        self.state.lock().await.rooms.is_member(connection, room)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub identities: usize,
    pub rooms: usize,
}

/// Drain everything currently queued for a connection.
#[cfg(test)]
pub(crate) fn drain(outbox: &mut Outbox) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = outbox.try_recv() {
        events.push(event);
    }
    events
}

use std::collections::{HashMap, HashSet};

use huddle_shared::constants::GENERAL_ROOM;
use huddle_shared::types::ConnectionId;
use tracing::{debug, info};

/// Room membership tables. Rooms exist only while they have subscribers and
/// are rebuilt purely from live joins; nothing here is persisted.
#[derive(Debug, Default)]
pub struct RoomMembership {
    rooms: HashMap<String, HashSet<ConnectionId>>,
    subscriptions: HashMap<ConnectionId, HashSet<String>>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection to a room. Idempotent. Returns `true` if the
    /// connection was not already a member.
    pub fn join(&mut self, connection: ConnectionId, room: &str) -> bool {
        let added = self
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection);
        self.subscriptions
            .entry(connection)
            .or_default()
            .insert(room.to_string());

        if added {
            debug!(
                room,
                connection = %connection.short(),
                members = self.member_count(room),
                "Connection joined room"
            );
        }
        added
    }

    /// Drop a connection from every room it belongs to. Empty DM rooms are
    /// removed; the general room stays. Returns the rooms the connection was in.
    pub fn leave_all(&mut self, connection: ConnectionId) -> HashSet<String> {
        let rooms = self.subscriptions.remove(&connection).unwrap_or_default();

        for room in &rooms {
            let should_remove = match self.rooms.get_mut(room) {
                Some(members) => {
                    members.remove(&connection);
                    members.is_empty() && room != GENERAL_ROOM
                }
                None => false,
            };

            if should_remove {
                self.rooms.remove(room);
                info!(room = %room, "Removed empty room");
            }
        }
        rooms
    }

    /// Fan-out targets: every member except the originating connection.
    pub fn members_excluding(&self, room: &str, connection: ConnectionId) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .copied()
                    .filter(|member| *member != connection)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn is_member(&self, connection: ConnectionId, room: &str) -> bool {
        self.rooms
            .get(room)
            .map(|members| members.contains(&connection))
            .unwrap_or(false)
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(HashSet::len).unwrap_or(0)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

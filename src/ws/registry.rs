//! Which connections are watching which poll room.
//!
//! Rooms live in a sharded map, so joins and leaves in unrelated rooms do not
//! contend. A connection is in at most one room; empty rooms are removed.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use log::info;

use super::connection::{ClientConnection, ConnectionId};

pub type RoomId = String;

#[derive(Default)]
pub struct ConnectionRegistry {
    rooms: DashMap<RoomId, HashMap<ConnectionId, Arc<ClientConnection>>>,
    /// Reverse index: connection -> the room it is in.
    membership: DashMap<ConnectionId, RoomId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room, moving it out of any room it was in.
    pub fn join(&self, room: &str, conn: Arc<ClientConnection>) {
        let conn_id = conn.id;
        if let Some(previous) = self.membership.insert(conn_id, room.to_string()) {
            if previous != room {
                self.remove_from_room(&previous, conn_id);
            }
        }

        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(conn_id, conn);

        info!("Connection {} joined room {}", conn_id, room);
    }

    /// Remove a connection. Unknown or already-removed connections are a no-op.
    ///
    /// Returns `true` if this emptied (and pruned) the room.
    pub fn leave(&self, room: &str, conn_id: ConnectionId) -> bool {
        let removed = self
            .membership
            .remove_if(&conn_id, |_, joined| joined == room)
            .is_some();
        if !removed {
            return false;
        }
        info!("Connection {} left room {}", conn_id, room);
        self.remove_from_room(room, conn_id)
    }

    /// Snapshot of a room's members for fan-out.
    pub fn members(&self, room: &str) -> Vec<Arc<ClientConnection>> {
        self.rooms
            .get(room)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room_of(&self, conn_id: ConnectionId) -> Option<RoomId> {
        self.membership.get(&conn_id).map(|room| room.clone())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn connection_count(&self) -> usize {
        self.membership.len()
    }

    fn remove_from_room(&self, room: &str, conn_id: ConnectionId) -> bool {
        let emptied = match self.rooms.get_mut(room) {
            Some(mut conns) => {
                let _ = conns.remove(&conn_id);
                conns.is_empty()
            }
            None => false,
        };
        // Re-check under the shard lock: someone may have joined in between
        emptied && self.rooms.remove_if(room, |_, conns| conns.is_empty()).is_some()
    }
}

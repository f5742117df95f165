//! Fan-out of server messages to everyone in a poll room.

use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use log::{debug, warn};

use super::registry::ConnectionRegistry;
use crate::protocol::ServerMessage;

pub struct BroadcastHub {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastHub {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Serialize once and queue the frame on every member of `room`.
    ///
    /// Never waits on a socket. Members whose queue is full are closed and
    /// dropped from the room. Returns the number of members that accepted it.
    pub fn broadcast(&self, room: &str, message: &ServerMessage) -> usize {
        let frame = match message.to_json() {
            Ok(json) => Utf8Bytes::from(json),
            Err(e) => {
                warn!("Failed to serialize {} for room {}: {}", message.kind(), room, e);
                return 0;
            }
        };

        let members = self.registry.members(room);
        if members.is_empty() {
            debug!("No connections in room {} for {}", room, message.kind());
            return 0;
        }

        let mut delivered = 0;
        for conn in &members {
            if conn.send(frame.clone()) {
                delivered += 1;
            } else if conn.is_closed() {
                let _ = self.registry.leave(room, conn.id);
            }
        }

        debug!(
            "Broadcast {} to room {} ({}/{} delivered)",
            message.kind(),
            room,
            delivered,
            members.len()
        );
        delivered
    }
}

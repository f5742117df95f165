//! Real-time plumbing: per-connection queues, the room registry, fan-out and
//! the socket loop that ties a WebSocket to a poll room.

pub mod broadcast;
pub mod connection;
pub mod registry;
pub mod socket;

//! One live participant's outbound side.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::Utf8Bytes;
use log::warn;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::protocol::ServerMessage;

pub type ConnectionId = Uuid;

/// Whether a joined connection asked for the operator's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Participant,
    Admin,
}

impl Role {
    // Anything other than "admin" is a participant. Display hint only.
    pub fn from_query(role: Option<&str>) -> Self {
        match role {
            Some("admin") => Role::Admin,
            _ => Role::Participant,
        }
    }
}

pub struct ClientConnection {
    pub id: ConnectionId,
    pub role: Role,
    tx: mpsc::Sender<Utf8Bytes>,
    /// Cancelled when the connection must go away (queue overflow, reader exit).
    closed: CancellationToken,
    connected_at: Instant,
    /// Milliseconds since `connected_at` of the last inbound frame.
    last_seen_ms: AtomicU64,
    overflowed: AtomicBool,
}

impl ClientConnection {
    pub fn new(role: Role, tx: mpsc::Sender<Utf8Bytes>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            tx,
            closed: CancellationToken::new(),
            connected_at: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
            overflowed: AtomicBool::new(false),
        }
    }

    /// Queue a pre-serialized frame without waiting.
    ///
    /// A full queue closes the connection; a closed queue just reports failure.
    pub fn send(&self, frame: Utf8Bytes) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                if !self.overflowed.swap(true, Ordering::Relaxed) {
                    warn!("Outbound queue full for connection {}, closing it", self.id);
                }
                self.close();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn send_message(&self, message: &ServerMessage) -> bool {
        match message.to_json() {
            Ok(json) => self.send(Utf8Bytes::from(json)),
            Err(e) => {
                warn!("Failed to serialize {} for connection {}: {}", message.kind(), self.id, e);
                false
            }
        }
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn mark_seen(&self) {
        let elapsed = self.connected_at.elapsed().as_millis() as u64;
        self.last_seen_ms.store(elapsed, Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.connected_at.elapsed().saturating_sub(last)
    }
}

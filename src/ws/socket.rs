//! One WebSocket from upgrade to disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures::{SinkExt, StreamExt};
use futures::stream::SplitSink;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::connection::{ClientConnection, Role};
use crate::config::Config;
use crate::error::SessionError;
use crate::handlers;
use crate::protocol::ServerMessage;
use crate::session::PollService;

/// How long the writer gets to flush after the connection is told to close.
const WRITER_GRACE: Duration = Duration::from_secs(5);

/// Service a joined WebSocket until the client leaves, the writer fails,
/// the heartbeat times out, or the server shuts down.
pub async fn run_socket(
    ws: WebSocket,
    room: String,
    role: Role,
    service: Arc<PollService>,
    config: Arc<Config>,
    shutdown: CancellationToken,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let (tx, rx) = mpsc::channel::<Utf8Bytes>(config.outbound_queue_capacity);
    let conn = Arc::new(ClientConnection::new(role, tx));
    let closed = conn.closed_token();

    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        rx,
        conn.clone(),
        config.heartbeat_interval,
        config.heartbeat_timeout,
    ));

    info!("Connection {} opened for poll {} as {:?}", conn.id, room, role);

    match service.join(&room, &conn).await {
        Ok(()) => {
            loop {
                let frame = tokio::select! {
                    _ = closed.cancelled() => break,
                    _ = shutdown.cancelled() => break,
                    frame = ws_rx.next() => frame,
                };

                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!("Read error on connection {}: {}", conn.id, e);
                        break;
                    }
                    None => break,
                };
                conn.mark_seen();

                match msg {
                    Message::Text(text) => {
                        handlers::handle_message(&service, &conn, &room, text.as_str()).await;
                    }
                    Message::Binary(data) => match std::str::from_utf8(&data) {
                        Ok(text) => handlers::handle_message(&service, &conn, &room, text).await,
                        Err(_) => debug!("Ignoring non-UTF-8 binary frame on connection {}", conn.id),
                    },
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            service.leave(&room, conn.id);
        }
        Err(e) => {
            match &e {
                SessionError::PollNotFound => warn!("Connection {} asked for unknown poll {}", conn.id, room),
                _ => warn!("Connection {} failed to join poll {}: {}", conn.id, room, e),
            }
            conn.send_message(&ServerMessage::error(e.to_string()));
        }
    }

    conn.close();
    if tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
    info!("Connection {} closed for poll {}", conn.id, room);
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Utf8Bytes>,
    conn: Arc<ClientConnection>,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
) {
    let closed = conn.closed_token();
    let mut ping = tokio::time::interval(heartbeat_interval);
    // First tick fires immediately
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            biased;
            frame = rx.recv() => match frame {
                Some(text) => {
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        debug!("Write failed on connection {}", conn.id);
                        conn.close();
                        return;
                    }
                }
                None => break,
            },
            _ = closed.cancelled() => break,
            _ = ping.tick() => {
                if conn.idle_for() > heartbeat_timeout {
                    warn!("Connection {} silent for {:?}, closing", conn.id, conn.idle_for());
                    conn.close();
                    break;
                }
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    conn.close();
                    return;
                }
            }
        }
    }

    // Flush whatever was queued before the close, then say goodbye.
    while let Ok(text) = rx.try_recv() {
        if ws_tx.send(Message::Text(text)).await.is_err() {
            return;
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
}

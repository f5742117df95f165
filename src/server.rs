//! HTTP surface: the WebSocket join endpoint and a health probe.

use std::future::Future;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::Database;
use crate::session::PollService;
use crate::ws::connection::Role;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::socket;

lazy_static! {
    static ref INVITE_ID: Regex = Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap();
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PollService>,
    pub config: Arc<Config>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, database: Database) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            service: Arc::new(PollService::new(Arc::new(database), registry)),
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JoinParams {
    role: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws/{invite_id}", get(join_room))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let registry = state.service.registry();
    Json(json!({
        "status": "ok",
        "rooms": registry.room_count(),
        "connections": registry.connection_count(),
    }))
}

async fn join_room(
    Path(invite_id): Path<String>,
    Query(params): Query<JoinParams>,
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !INVITE_ID.is_match(&invite_id) {
        warn!("Rejected join with invalid invite ID {:?}", invite_id);
        return (StatusCode::BAD_REQUEST, "Invalid invite ID.").into_response();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!("Bad WebSocket upgrade for poll {}: {}", invite_id, rejection);
            return rejection.into_response();
        }
    };

    let role = Role::from_query(params.role.as_deref());
    let AppState { service, config, shutdown } = state;
    ws.max_message_size(config.max_message_size)
        .on_failed_upgrade(|e| warn!("WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| socket::run_socket(socket, invite_id, role, service, config, shutdown))
}

/// Serve on an already-bound listener until `signal` resolves.
///
/// Open sockets are told to close when the signal fires.
pub async fn serve<S>(listener: TcpListener, state: AppState, signal: S) -> std::io::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            signal.await;
            info!("Shutdown requested, closing connections");
            shutdown.cancel();
        })
        .await
}

pub async fn run(config: Config, database: Database) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(config.bind_addr()).await?;
    info!("Listening on {}", listener.local_addr()?);
    serve(listener, AppState::new(config, database), ctrl_c()).await?;
    Ok(())
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

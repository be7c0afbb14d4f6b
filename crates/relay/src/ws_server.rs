//! WebSocket server handler using Axum.
//!
//! Each connection gets a writer task draining its outbound channel and a
//! reader loop that forwards subscriber frames to the hub. The handlers never
//! touch subscription state themselves.

use crate::client::{ClientId, ClientState, ConnectionTable, CLIENT_CHANNEL_BUFFER_SIZE};
use crate::error::{RelayError, Result};
use crate::hub::{HubEvent, HubStats};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// Shared application state.
pub struct AppState {
    pub connections: Arc<ConnectionTable>,
    pub hub_tx: mpsc::UnboundedSender<HubEvent>,
}

impl AppState {
    /// Ask the hub for a stats snapshot.
    pub async fn stats(&self) -> Result<HubStats> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.hub_tx
            .send(HubEvent::Stats(reply_tx))
            .map_err(|_| RelayError::HubUnavailable)?;
        reply_rx.await.map_err(|_| RelayError::HubUnavailable)
    }
}

/// Create the WebSocket router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    clients: usize,
    keywords: usize,
    upstream_active: bool,
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let clients = state.connections.client_count();
    match state.stats().await {
        Ok(stats) => Json(HealthResponse {
            status: "ok",
            clients,
            keywords: stats.keywords,
            upstream_active: stats.upstream_active,
        }),
        Err(e) => {
            warn!("Health check could not reach hub: {}", e);
            Json(HealthResponse {
                status: "degraded",
                clients,
                keywords: 0,
                upstream_active: false,
            })
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(CLIENT_CHANNEL_BUFFER_SIZE);

    let client = Arc::new(ClientState::new(tx));
    let client_id = state.connections.register(client.clone());
    if state.hub_tx.send(HubEvent::Connected(client_id)).is_err() {
        warn!("Hub unavailable, rejecting client {}", client_id);
        state.connections.unregister(&client_id);
        return;
    }

    counter!("relay_connections_total").increment(1);
    gauge!("relay_active_connections").set(state.connections.client_count() as f64);
    info!("Client {} connected", client_id);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut ping_interval = interval(Duration::from_secs(30));
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        forward(&state, client_id, text.as_str().to_owned());
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => forward(&state, client_id, text),
                        Err(_) => debug!("Dropping non-UTF-8 frame from {}", client_id),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if !keep_alive(&client, Message::Pong(data)) {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {:?}", client_id, e);
                        break;
                    }
                }
            }

            _ = ping_interval.tick() => {
                if !keep_alive(&client, Message::Ping(Vec::<u8>::new().into())) {
                    break;
                }
            }
        }
    }

    // Cleanup
    state.connections.unregister(&client_id);
    let _ = state.hub_tx.send(HubEvent::Disconnected(client_id));
    send_task.abort();

    counter!("relay_disconnections_total").increment(1);
    gauge!("relay_active_connections").set(state.connections.client_count() as f64);
    info!("Client {} disconnected", client_id);
}

/// Queue a control frame. False once the writer task is gone; a full
/// buffer just skips the frame.
fn keep_alive(client: &ClientState, msg: Message) -> bool {
    match client.try_send(msg) {
        Ok(()) | Err(RelayError::ClientBufferFull(_)) => true,
        Err(_) => false,
    }
}

fn forward(state: &AppState, client: ClientId, text: String) {
    if state.hub_tx.send(HubEvent::Message { client, text }).is_err() {
        warn!("Hub unavailable, dropping message from {}", client);
    }
}

//! Connected clients and the best-effort send primitive.
//!
//! The connection table is shared between the WebSocket handlers (which add
//! and remove entries) and the hub (which only sends). Keyword state lives in
//! the [`SubscriptionRegistry`](crate::registry::SubscriptionRegistry), never
//! here.

use crate::error::{RelayError, Result};
use axum::extract::ws::Message;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::info;
use uuid::Uuid;

/// Unique client identifier.
pub type ClientId = Uuid;

/// Outbound frames buffered per client before sends start failing.
pub const CLIENT_CHANNEL_BUFFER_SIZE: usize = 1000;

/// Best-effort delivery of a serialized message to one client.
pub trait Transport: Send + Sync + 'static {
    /// Queue `payload` for `client`. Fails if the client is unknown or gone.
    fn send(&self, client: &ClientId, payload: &str) -> Result<()>;
}

/// State for a single connected client.
pub struct ClientState {
    pub id: ClientId,
    /// Bounded channel drained by the client's WebSocket writer task.
    pub tx: mpsc::Sender<Message>,
}

impl ClientState {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    /// Queue a frame without waiting. A full buffer drops the frame.
    pub fn try_send(&self, msg: Message) -> Result<()> {
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => RelayError::ClientBufferFull(self.id.to_string()),
            TrySendError::Closed(_) => RelayError::ChannelSend,
        })
    }

    /// Queue a text frame for this client.
    pub fn send_text(&self, payload: &str) -> Result<()> {
        self.try_send(Message::Text(payload.to_owned().into()))
    }
}

/// Lock-free table of connected clients.
#[derive(Default)]
pub struct ConnectionTable {
    clients: DashMap<ClientId, Arc<ClientState>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client.
    pub fn register(&self, client: Arc<ClientState>) -> ClientId {
        let id = client.id;
        self.clients.insert(id, client);
        info!("Client {} registered", id);
        id
    }

    /// Remove a client. Its writer task ends once the sender is dropped.
    pub fn unregister(&self, client_id: &ClientId) {
        if self.clients.remove(client_id).is_some() {
            info!("Client {} unregistered", client_id);
        }
    }

    pub fn get(&self, client_id: &ClientId) -> Option<Arc<ClientState>> {
        self.clients.get(client_id).map(|r| r.clone())
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

impl Transport for ConnectionTable {
    fn send(&self, client: &ClientId, payload: &str) -> Result<()> {
        let state = self
            .get(client)
            .ok_or_else(|| RelayError::ClientNotFound(client.to_string()))?;
        state.send_text(payload)
    }
}

//! The hub: single owner of subscription state.
//!
//! Every connect, subscriber message, disconnect and upstream item arrives
//! as a [`HubEvent`] on one queue and is handled to completion before the
//! next, so registry mutations and fan-out never interleave.
//!
//! ```text
//! WebSocket clients ──┐
//!                     ├──> HubEvent queue ──> Hub ──> SubscriptionRegistry
//! Upstream stream ────┘                        │ ──> StreamController ──> upstream
//!                                              └───> FanoutRouter ──> Transport
//! ```

use crate::client::{ClientId, Transport};
use crate::controller::{StreamController, UpstreamStream};
use crate::protocol::{ClientMessage, GeoPoint};
use crate::registry::SubscriptionRegistry;
use crate::router::FanoutRouter;
use crate::trends::TrendsClient;
use crate::upstream::UpstreamEvent;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Input to the hub.
#[derive(Debug)]
pub enum HubEvent {
    /// A client connected; it starts with no keywords.
    Connected(ClientId),
    /// Raw text received from a client.
    Message { client: ClientId, text: String },
    /// A client's connection closed.
    Disconnected(ClientId),
    /// Something from the upstream subscription `generation`.
    Upstream { generation: u64, event: UpstreamEvent },
    /// Snapshot request for the health endpoint.
    Stats(oneshot::Sender<HubStats>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub clients: usize,
    pub keywords: usize,
    pub upstream_active: bool,
}

pub struct Hub<U: UpstreamStream, T: Transport> {
    registry: SubscriptionRegistry,
    controller: StreamController<U>,
    router: FanoutRouter,
    transport: Arc<T>,
    trends: Option<Arc<TrendsClient>>,
}

impl<U: UpstreamStream, T: Transport> Hub<U, T> {
    pub fn new(upstream: U, transport: Arc<T>, trends: Option<TrendsClient>) -> Self {
        Self {
            registry: SubscriptionRegistry::new(),
            controller: StreamController::new(upstream),
            router: FanoutRouter::new(),
            transport,
            trends: trends.map(Arc::new),
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn controller(&self) -> &StreamController<U> {
        &self.controller
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            clients: self.registry.user_count(),
            keywords: self.registry.keyword_count(),
            upstream_active: self.controller.is_active(),
        }
    }

    /// Process events until shutdown, then stop the upstream.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<HubEvent>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        info!("Hub running");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Hub received shutdown signal");
                    break;
                }

                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            warn!("Hub event channel closed");
                            break;
                        }
                    }
                }
            }
        }

        self.controller.shutdown().await;
        info!("Hub stopped");
    }

    /// Handle one event to completion.
    pub async fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Connected(client) => {
                self.registry.register(client);
                debug!("Client {} joined", client);
            }
            HubEvent::Message { client, text } => self.handle_message(client, &text).await,
            HubEvent::Disconnected(client) => {
                let obsolete = self.registry.remove_user(client);
                debug!(
                    "Client {} left, {} keywords no longer tracked",
                    client,
                    obsolete.len()
                );
                if !obsolete.is_empty() {
                    self.refresh_upstream().await;
                }
            }
            HubEvent::Upstream { generation, event } => self.handle_upstream(generation, event),
            HubEvent::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
        }
    }

    async fn handle_message(&mut self, client: ClientId, text: &str) {
        let Some(message) = ClientMessage::parse(text) else {
            debug!("Dropping unusable message from {}", client);
            return;
        };

        match message {
            ClientMessage::Track(keyword) => {
                debug!("Client {} tracks {}", client, keyword);
                if self.registry.track(client, &keyword) {
                    self.refresh_upstream().await;
                }
            }
            ClientMessage::Untrack(keyword) => {
                debug!("Client {} untracks {}", client, keyword);
                if self.registry.untrack(client, &keyword) {
                    self.refresh_upstream().await;
                }
            }
            ClientMessage::Trending(location) => self.spawn_trends_lookup(client, location),
        }
    }

    fn handle_upstream(&mut self, generation: u64, event: UpstreamEvent) {
        if !self.controller.is_current(generation) {
            debug!("Dropping event from stale upstream generation {}", generation);
            return;
        }

        match event {
            UpstreamEvent::Item(tweet) => {
                self.router.route(&tweet, &self.registry, &*self.transport);
            }
            UpstreamEvent::Connected => info!("Upstream connected"),
            UpstreamEvent::Disconnected => warn!("Upstream disconnected, reconnect pending"),
            UpstreamEvent::Warning(warning) => warn!("Upstream warning: {}", warning),
            UpstreamEvent::Error(err) => error!("Upstream error: {}", err),
        }
    }

    async fn refresh_upstream(&mut self) {
        let keywords = self.registry.keywords();
        self.controller.refresh(keywords).await;
    }

    /// Trends lookups do not touch the registry, so they run off the hub.
    fn spawn_trends_lookup(&self, client: ClientId, location: Option<GeoPoint>) {
        let Some(trends) = self.trends.clone() else {
            debug!("Trends lookup not configured, ignoring request from {}", client);
            return;
        };
        let transport = self.transport.clone();

        tokio::spawn(async move {
            let names = match trends.trends(location).await {
                Ok(names) => names,
                Err(e) => {
                    warn!("Trends lookup for {} failed: {}", client, e);
                    return;
                }
            };
            match serde_json::to_string(&names) {
                Ok(payload) => {
                    if let Err(e) = transport.send(&client, &payload) {
                        warn!("Failed to send trends to {}: {}", client, e);
                    }
                }
                Err(e) => warn!("Failed to serialize trends: {}", e),
            }
        });
    }
}

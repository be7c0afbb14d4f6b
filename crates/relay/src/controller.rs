//! Stream controller: keeps the upstream subscription in line with the
//! global keyword set.
//!
//! The upstream takes a complete keyword list per subscription, so every
//! change is a full stop followed by a fresh start. The stop is awaited
//! before the start, so two subscriptions are never live at once.

use async_trait::async_trait;
use metrics::{counter, gauge};
use tracing::{debug, info};

/// A keyword-filtered upstream feed.
#[async_trait]
pub trait UpstreamStream: Send + 'static {
    /// Open a subscription for `keywords`. Items it produces are tagged
    /// with `generation`.
    async fn start(&mut self, keywords: Vec<String>, generation: u64);

    /// Tear down the current subscription, if any. Returns once it is gone.
    async fn stop(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    /// No subscription, no connection held.
    Idle,
    /// Subscribed with `keywords`.
    Active { keywords: Vec<String>, generation: u64 },
}

pub struct StreamController<U: UpstreamStream> {
    upstream: U,
    state: StreamState,
    last_generation: u64,
}

impl<U: UpstreamStream> StreamController<U> {
    pub fn new(upstream: U) -> Self {
        Self {
            upstream,
            state: StreamState::Idle,
            last_generation: 0,
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, StreamState::Active { .. })
    }

    /// Whether `generation` belongs to the live subscription.
    pub fn is_current(&self, generation: u64) -> bool {
        matches!(self.state, StreamState::Active { generation: g, .. } if g == generation)
    }

    /// Re-subscribe with the full keyword list, or go idle if it is empty.
    pub async fn refresh(&mut self, keywords: Vec<String>) {
        if let StreamState::Active { keywords: current, .. } = &self.state {
            if *current == keywords {
                debug!("Keyword list unchanged, keeping upstream subscription");
                return;
            }
        }

        if self.is_active() {
            self.upstream.stop().await;
            self.state = StreamState::Idle;
            info!("Upstream subscription stopped");
        }

        if keywords.is_empty() {
            gauge!("relay_tracked_keywords").set(0.0);
            info!("No keywords tracked, upstream idle");
            return;
        }

        self.last_generation += 1;
        let generation = self.last_generation;
        info!(
            "Subscribing upstream to {} keywords (generation {}): {:?}",
            keywords.len(),
            generation,
            keywords
        );
        gauge!("relay_tracked_keywords").set(keywords.len() as f64);
        counter!("relay_upstream_restarts_total").increment(1);

        self.upstream.start(keywords.clone(), generation).await;
        self.state = StreamState::Active {
            keywords,
            generation,
        };
    }

    /// Stop any live subscription.
    pub async fn shutdown(&mut self) {
        if self.is_active() {
            self.upstream.stop().await;
            self.state = StreamState::Idle;
            info!("Upstream subscription stopped for shutdown");
        }
    }
}

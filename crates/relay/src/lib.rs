//! Keyword relay: one keyword-filtered upstream stream, many subscribers.
//!
//! This service:
//! - Accepts WebSocket connections from subscribers
//! - Lets each subscriber track and untrack keywords
//! - Keeps one upstream subscription covering the union of all keywords
//! - Delivers each upstream item to the subscribers whose keywords match it
//!
//! ## Architecture
//!
//! ```text
//! Upstream feed ({"track": [...]})
//!         ↓
//! WsUpstream (one connection task per keyword list)
//!         ↓
//! Hub (single event queue)
//!   ├─ SubscriptionRegistry (refcounted keywords)
//!   ├─ StreamController (stop old, start new)
//!   └─ FanoutRouter (substring match → recipients)
//!         ↓
//! ConnectionTable → WebSocket clients
//! ```

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod hub;
pub mod keyword;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod trends;
pub mod upstream;
pub mod ws_server;

pub use client::{ClientId, ClientState, ConnectionTable, Transport};
pub use config::{ConfigError, RelayConfig};
pub use controller::{StreamController, StreamState, UpstreamStream};
pub use error::{RelayError, Result};
pub use hub::{Hub, HubEvent, HubStats};
pub use keyword::Keyword;
pub use protocol::{ClientMessage, GeoPoint, Tweet};
pub use registry::SubscriptionRegistry;
pub use router::{match_keywords, DeliveryReport, FanoutRouter};
pub use trends::TrendsClient;
pub use upstream::{UpstreamEvent, UpstreamSettings, WsUpstream};
pub use ws_server::{create_router, AppState};

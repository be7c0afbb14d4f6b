//! Upstream stream connection layer shared by the relay.
//!
//! Owns one WebSocket connection to the keyword-filtered source feed,
//! keeps it alive with pings and reconnects with exponential backoff.
//! What to send on connect and how to interpret frames is delegated to a
//! [`StreamHandler`].

pub mod connection;
pub mod error;
pub mod handler;
pub mod messages;

pub use connection::{StreamConnection, StreamConnectionConfig};
pub use error::Error;
pub use handler::StreamHandler;
pub use messages::ControlCommand;

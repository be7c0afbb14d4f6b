//! Handler trait plugged into a stream connection.

use crate::error::Result;
use async_trait::async_trait;

/// Callbacks the [`StreamConnection`](crate::StreamConnection) invokes as the
/// upstream connection moves through its lifecycle.
#[async_trait]
pub trait StreamHandler: Send + Sync + 'static {
    /// WebSocket URL of the upstream feed.
    fn url(&self) -> &str;

    /// Bearer credential sent in the `Authorization` header of the handshake.
    fn bearer_token(&self) -> Option<&str> {
        None
    }

    /// Message sent right after every (re)connect, e.g. the track list.
    /// Return None if the feed needs no initial message.
    fn on_connect_message(&self) -> Option<String>;

    /// Called for every text frame.
    async fn on_message(&self, msg: &str) -> Result<()>;

    /// Called for every binary frame. Ignored by default.
    async fn on_binary_message(&self, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Called after the handshake completes and the connect message is sent.
    async fn on_connected(&self) {}

    /// Called when the connection is lost, before the backoff sleep.
    async fn on_disconnect(&self) {}
}

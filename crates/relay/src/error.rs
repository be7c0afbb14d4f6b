//! Relay error types.

use thiserror::Error;

/// Relay error type.
#[derive(Debug, Error)]
pub enum RelayError {
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error (trends lookups).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream connection layer error.
    #[error("Upstream error: {0}")]
    Upstream(#[from] common::Error),

    /// Startup configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Trends API returned an unusable response.
    #[error("Trends API error: {0}")]
    Trends(String),

    /// Client not found in the connection table.
    #[error("Client not found: {0}")]
    ClientNotFound(String),

    /// Outbound channel of a client is closed.
    #[error("Channel send error")]
    ChannelSend,

    /// Outbound buffer of a slow client is full; the message was dropped.
    #[error("Client buffer full: {0}")]
    ClientBufferFull(String),

    /// The hub task is gone.
    #[error("Hub unavailable")]
    HubUnavailable,
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

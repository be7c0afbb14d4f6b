//! Error types for the upstream connection layer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Invalid credential header: {0}")]
    InvalidCredentials(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connect failed: {0}")]
    Connect(String),
}

pub type Result<T> = std::result::Result<T, Error>;

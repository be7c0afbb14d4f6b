//! WebSocket implementation of the upstream feed.
//!
//! Each subscription is one [`StreamConnection`] task. On every (re)connect
//! the task sends `{"track": [...]}` with the complete keyword list; incoming
//! frames are classified and forwarded to the hub tagged with the
//! subscription's generation.

use crate::controller::UpstreamStream;
use crate::hub::HubEvent;
use crate::protocol::Tweet;
use async_trait::async_trait;
use common::error::Result;
use common::{ControlCommand, StreamConnection, StreamConnectionConfig, StreamHandler};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Something the upstream feed reported.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    Item(Tweet),
    Connected,
    Disconnected,
    Warning(String),
    Error(String),
}

/// Build the subscription message for a keyword list.
pub fn build_track_message(keywords: &[String]) -> String {
    json!({ "track": keywords }).to_string()
}

/// Classify one upstream text frame. Ok(None) means "not interesting".
pub fn classify_frame(text: &str) -> std::result::Result<Option<UpstreamEvent>, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;

    if let Some(warning) = value.get("warning") {
        return Ok(Some(UpstreamEvent::Warning(warning.to_string())));
    }
    if let Some(err) = value.get("error").or_else(|| value.get("disconnect")) {
        return Ok(Some(UpstreamEvent::Error(err.to_string())));
    }
    Ok(Tweet::from_value(value).map(UpstreamEvent::Item))
}

/// Handler for one subscription generation.
pub struct TrackHandler {
    url: String,
    token: String,
    keywords: Vec<String>,
    generation: u64,
    events: mpsc::UnboundedSender<HubEvent>,
}

impl TrackHandler {
    pub fn new(
        url: String,
        token: String,
        keywords: Vec<String>,
        generation: u64,
        events: mpsc::UnboundedSender<HubEvent>,
    ) -> Self {
        Self {
            url,
            token,
            keywords,
            generation,
            events,
        }
    }

    fn emit(&self, event: UpstreamEvent) {
        let generation = self.generation;
        if self.events.send(HubEvent::Upstream { generation, event }).is_err() {
            debug!("Hub is gone, dropping upstream event (generation {})", generation);
        }
    }
}

#[async_trait]
impl StreamHandler for TrackHandler {
    fn url(&self) -> &str {
        &self.url
    }

    fn bearer_token(&self) -> Option<&str> {
        Some(&self.token)
    }

    fn on_connect_message(&self) -> Option<String> {
        Some(build_track_message(&self.keywords))
    }

    async fn on_message(&self, msg: &str) -> Result<()> {
        match classify_frame(msg)? {
            Some(event) => self.emit(event),
            None => debug!("Ignoring upstream frame: {}", msg),
        }
        Ok(())
    }

    async fn on_connected(&self) {
        self.emit(UpstreamEvent::Connected);
    }

    async fn on_disconnect(&self) {
        self.emit(UpstreamEvent::Disconnected);
    }
}

/// Connection settings shared by all subscriptions.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub url: String,
    pub token: String,
    pub connection: StreamConnectionConfig,
    /// How long `stop` waits for a graceful close before aborting the task.
    pub stop_timeout: Duration,
}

impl UpstreamSettings {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            connection: StreamConnectionConfig::default(),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

struct Worker {
    command_tx: mpsc::Sender<ControlCommand>,
    join_handle: JoinHandle<()>,
    generation: u64,
}

/// Upstream feed over WebSocket, one connection task per subscription.
pub struct WsUpstream {
    settings: UpstreamSettings,
    events: mpsc::UnboundedSender<HubEvent>,
    worker: Option<Worker>,
}

impl WsUpstream {
    pub fn new(settings: UpstreamSettings, events: mpsc::UnboundedSender<HubEvent>) -> Self {
        Self {
            settings,
            events,
            worker: None,
        }
    }
}

#[async_trait]
impl UpstreamStream for WsUpstream {
    async fn start(&mut self, keywords: Vec<String>, generation: u64) {
        if self.worker.is_some() {
            self.stop().await;
        }

        let (command_tx, command_rx) = mpsc::channel::<ControlCommand>(4);
        let handler = TrackHandler::new(
            self.settings.url.clone(),
            self.settings.token.clone(),
            keywords,
            generation,
            self.events.clone(),
        );
        let config = StreamConnectionConfig {
            label: format!("upstream-{}", generation),
            ..self.settings.connection.clone()
        };
        let connection = StreamConnection::new(handler, config, command_rx);

        let join_handle = tokio::spawn(async move {
            if let Err(e) = connection.run().await {
                error!("Upstream connection failed: {:?}", e);
            }
        });

        info!("Started upstream subscription (generation {})", generation);
        self.worker = Some(Worker {
            command_tx,
            join_handle,
            generation,
        });
    }

    async fn stop(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };

        let _ = worker.command_tx.send(ControlCommand::Shutdown).await;
        if tokio::time::timeout(self.settings.stop_timeout, &mut worker.join_handle)
            .await
            .is_err()
        {
            warn!(
                "Upstream generation {} did not close within {:?}, aborting",
                worker.generation, self.settings.stop_timeout
            );
            worker.join_handle.abort();
            let _ = worker.join_handle.await;
        }
        info!("Stopped upstream subscription (generation {})", worker.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    fn words(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_build_track_message() {
        let msg = build_track_message(&words(&["golang", "rust"]));
        let parsed: Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed, json!({"track": ["golang", "rust"]}));
    }

    #[test]
    fn test_classify_frame() {
        match classify_frame(r#"{"id":1,"text":"hello"}"#).unwrap() {
            Some(UpstreamEvent::Item(tweet)) => assert_eq!(tweet.text(), "hello"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            classify_frame(r#"{"warning":{"code":"FALLING_BEHIND"}}"#).unwrap(),
            Some(UpstreamEvent::Warning(_))
        ));
        assert!(matches!(
            classify_frame(r#"{"error":"rate limited"}"#).unwrap(),
            Some(UpstreamEvent::Error(_))
        ));
        assert_eq!(classify_frame(r#"{"limit":{"track":3}}"#).unwrap(), None);
        assert!(classify_frame("garbage").is_err());
    }

    #[tokio::test]
    async fn test_handler_tags_events_with_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = TrackHandler::new(
            "ws://localhost".to_string(),
            "token".to_string(),
            words(&["rust"]),
            7,
            tx,
        );

        handler.on_message(r#"{"text":"rust"}"#).await.unwrap();
        match rx.recv().await.unwrap() {
            HubEvent::Upstream { generation, event } => {
                assert_eq!(generation, 7);
                assert!(matches!(event, UpstreamEvent::Item(_)));
            }
            other => panic!("unexpected: {:?}", other),
        }

        // Uninteresting frames produce nothing.
        handler.on_message(r#"{"limit":{}}"#).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_start_then_stop_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let track = ws.next().await.unwrap().unwrap().into_text().unwrap();
            ws.send(Message::Text(r#"{"text":"Rust!"}"#.to_string()))
                .await
                .unwrap();
            let mut closed = false;
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    closed = true;
                    break;
                }
            }
            (track, closed)
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut upstream = WsUpstream::new(
            UpstreamSettings::new(format!("ws://{}", addr), "secret"),
            tx,
        );
        upstream.start(words(&["rust"]), 1).await;

        let mut got_item = false;
        while !got_item {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if let HubEvent::Upstream { generation: 1, event: UpstreamEvent::Item(tweet) } = event {
                assert_eq!(tweet.text(), "Rust!");
                got_item = true;
            }
        }

        upstream.stop().await;
        let (track, closed) = server.await.unwrap();
        assert_eq!(track, r#"{"track":["rust"]}"#);
        assert!(closed);
    }
}

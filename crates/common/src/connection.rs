//! Upstream WebSocket connection with ping keepalive and reconnect backoff.

use crate::error::{Error, Result};
use crate::handler::StreamHandler;
use crate::messages::ControlCommand;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::{
    client_async_tls_with_config,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
        protocol::{frame::coding::CloseCode, CloseFrame, Message},
    },
    Connector,
};
use tracing::{debug, error, info, warn};
use url::Url;

/// Configuration for a stream connection.
#[derive(Debug, Clone)]
pub struct StreamConnectionConfig {
    /// Interval between ping frames.
    pub ping_interval: Duration,
    /// Timeout for TCP connect and for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Initial delay before a reconnection attempt.
    pub reconnect_delay: Duration,
    /// Upper bound for the exponential backoff.
    pub max_reconnect_delay: Duration,
    /// Label for logs and metrics.
    pub label: String,
}

impl Default for StreamConnectionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            label: "upstream".to_string(),
        }
    }
}

/// One logical upstream subscription.
///
/// Reconnects until it receives [`ControlCommand::Shutdown`] or its command
/// channel is dropped. Each reconnect replays the handler's connect message.
pub struct StreamConnection<H: StreamHandler> {
    handler: Arc<H>,
    config: StreamConnectionConfig,
    command_rx: mpsc::Receiver<ControlCommand>,
}

impl<H: StreamHandler> StreamConnection<H> {
    pub fn new(
        handler: H,
        config: StreamConnectionConfig,
        command_rx: mpsc::Receiver<ControlCommand>,
    ) -> Self {
        Self {
            handler: Arc::new(handler),
            config,
            command_rx,
        }
    }

    /// Run until shutdown.
    pub async fn run(mut self) -> Result<()> {
        let mut reconnect_delay = self.config.reconnect_delay;

        loop {
            let mut connected = false;
            let outcome = self.connect_and_run_loop(&mut connected).await;

            if connected {
                gauge!("upstream_active_connections", "stream" => self.config.label.clone())
                    .decrement(1.0);
                // A connection that got through the handshake resets the backoff.
                reconnect_delay = self.config.reconnect_delay;
            }

            match outcome {
                Ok(()) => {
                    info!("[{}] Upstream closed gracefully", self.config.label);
                    break;
                }
                Err(e) => {
                    counter!("upstream_errors_total", "stream" => self.config.label.clone(), "error_type" => "disconnect").increment(1);
                    warn!(
                        "[{}] Upstream disconnected: {:?}, reconnecting in {:?}",
                        self.config.label, e, reconnect_delay
                    );
                    self.handler.on_disconnect().await;

                    let shutdown = tokio::select! {
                        _ = tokio::time::sleep(reconnect_delay) => false,
                        cmd = self.command_rx.recv() => {
                            info!("[{}] Stopping during backoff ({:?})", self.config.label, cmd);
                            true
                        }
                    };
                    if shutdown {
                        break;
                    }

                    reconnect_delay = (reconnect_delay * 2).min(self.config.max_reconnect_delay);
                }
            }
        }

        Ok(())
    }

    async fn connect_and_run_loop(&mut self, connected: &mut bool) -> Result<()> {
        let url_str = self.handler.url().to_string();
        info!("[{}] Connecting to upstream: {}", self.config.label, url_str);

        let url = Url::parse(&url_str)?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::Connect("no host in URL".to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::Connect(format!("no port for scheme {}", url.scheme())))?;

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| Error::Connect(format!("DNS resolution failed: {}", e)))?
            .collect();

        // Prefer IPv4; some hosts publish AAAA records that never answer.
        let mut sorted_addrs: Vec<SocketAddr> =
            addrs.iter().filter(|a| a.is_ipv4()).copied().collect();
        sorted_addrs.extend(addrs.iter().filter(|a| a.is_ipv6()).copied());

        let mut tcp_stream = None;
        for addr in &sorted_addrs {
            debug!("[{}] Trying {}", self.config.label, addr);
            match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr)).await
            {
                Ok(Ok(stream)) => {
                    tcp_stream = Some(stream);
                    break;
                }
                Ok(Err(e)) => {
                    debug!("[{}] TCP connect to {} failed: {}", self.config.label, addr, e);
                }
                Err(_) => {
                    debug!("[{}] TCP connect to {} timed out", self.config.label, addr);
                }
            }
        }
        let tcp_stream = tcp_stream
            .ok_or_else(|| Error::Connect("all connection attempts failed".to_string()))?;

        let mut request = url_str.as_str().into_client_request()?;
        if let Some(token) = self.handler.bearer_token() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| Error::InvalidCredentials(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let connector = if url.scheme() == "wss" {
            Some(tls_connector()?)
        } else {
            None
        };

        let (ws_stream, response) = tokio::time::timeout(
            self.config.connect_timeout,
            client_async_tls_with_config(request, tcp_stream, None, connector),
        )
        .await
        .map_err(|_| Error::Connect("handshake timed out".to_string()))??;

        debug!(
            "[{}] Handshake complete, status: {:?}",
            self.config.label,
            response.status()
        );
        let (mut write, mut read) = ws_stream.split();

        *connected = true;
        gauge!("upstream_active_connections", "stream" => self.config.label.clone())
            .increment(1.0);
        info!("[{}] Upstream connected", self.config.label);

        if let Some(init_msg) = self.handler.on_connect_message() {
            debug!("[{}] Sending connect message: {}", self.config.label, init_msg);
            write.send(Message::Text(init_msg)).await?;
        }

        self.handler.on_connected().await;

        let mut ping_interval = interval(self.config.ping_interval);
        ping_interval.reset();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            counter!("upstream_messages_received_total", "stream" => self.config.label.clone()).increment(1);
                            if let Err(e) = self.handler.on_message(&text).await {
                                error!("[{}] Error handling message: {:?}", self.config.label, e);
                                counter!("upstream_errors_total", "stream" => self.config.label.clone(), "error_type" => "handler").increment(1);
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            if let Err(e) = self.handler.on_binary_message(&data).await {
                                error!("[{}] Error handling binary message: {:?}", self.config.label, e);
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            debug!("[{}] Received pong", self.config.label);
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("[{}] Received close frame: {:?}", self.config.label, frame);
                            return Err(Error::ConnectionClosed);
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            return Err(Error::WebSocket(e));
                        }
                        None => {
                            info!("[{}] Upstream stream ended", self.config.label);
                            return Err(Error::ConnectionClosed);
                        }
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ControlCommand::Shutdown) => {
                            info!("[{}] Received shutdown command", self.config.label);
                            let close_frame = CloseFrame {
                                code: CloseCode::Normal,
                                reason: "Shutdown".into(),
                            };
                            let _ = write.send(Message::Close(Some(close_frame))).await;
                            return Ok(());
                        }
                        None => {
                            info!("[{}] Command channel closed", self.config.label);
                            return Ok(());
                        }
                    }
                }

                _ = ping_interval.tick() => {
                    write.send(Message::Ping(Vec::new())).await?;
                }
            }
        }
    }
}

fn tls_connector() -> Result<Connector> {
    let mut root_store = rustls::RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs();
    for cert in certs.certs {
        let _ = root_store.add(cert);
    }

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| Error::Tls(e.to_string()))?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    Ok(Connector::Rustls(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    struct RecordingHandler {
        url: String,
        received: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl StreamHandler for RecordingHandler {
        fn url(&self) -> &str {
            &self.url
        }

        fn bearer_token(&self) -> Option<&str> {
            Some("secret")
        }

        fn on_connect_message(&self) -> Option<String> {
            Some(r#"{"track":["rust"]}"#.to_string())
        }

        async fn on_message(&self, msg: &str) -> Result<()> {
            let _ = self.received.send(msg.to_string());
            Ok(())
        }
    }

    fn fast_config() -> StreamConnectionConfig {
        StreamConnectionConfig {
            reconnect_delay: Duration::from_millis(20),
            max_reconnect_delay: Duration::from_millis(100),
            label: "test".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = StreamConnectionConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_sends_track_message_with_credentials() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let auth = Arc::new(Mutex::new(None::<String>));
        let auth_seen = auth.clone();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let callback = move |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
                *auth_seen.lock().unwrap() = req
                    .headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .unwrap();

            let first = ws.next().await.unwrap().unwrap();
            ws.send(Message::Text(r#"{"text":"rust is fun"}"#.to_string()))
                .await
                .unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
            first.into_text().unwrap()
        });

        let (received_tx, mut received_rx) = mpsc::unbounded_channel();
        let handler = RecordingHandler {
            url: format!("ws://{}", addr),
            received: received_tx,
        };
        let (command_tx, command_rx) = mpsc::channel(4);
        let connection = StreamConnection::new(handler, fast_config(), command_rx);
        let task = tokio::spawn(connection.run());

        let item = tokio::time::timeout(Duration::from_secs(5), received_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item, r#"{"text":"rust is fun"}"#);

        command_tx.send(ControlCommand::Shutdown).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let first = server.await.unwrap();
        assert_eq!(first, r#"{"track":["rust"]}"#);
        assert_eq!(auth.lock().unwrap().as_deref(), Some("Bearer secret"));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_backoff() {
        // Nothing listens on this port once the listener is dropped.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (received_tx, _received_rx) = mpsc::unbounded_channel();
        let handler = RecordingHandler {
            url: format!("ws://{}", addr),
            received: received_tx,
        };
        let config = StreamConnectionConfig {
            reconnect_delay: Duration::from_secs(60),
            max_reconnect_delay: Duration::from_secs(60),
            ..fast_config()
        };
        let (command_tx, command_rx) = mpsc::channel(4);
        let task = tokio::spawn(StreamConnection::new(handler, config, command_rx).run());

        command_tx.send(ControlCommand::Shutdown).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert!(result.is_ok(), "shutdown should not wait out the backoff");
    }
}

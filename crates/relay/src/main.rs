//! Relay service entry point.

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use relay::{
    create_router, AppState, ConnectionTable, Hub, RelayConfig, TrendsClient, UpstreamSettings,
    WsUpstream,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting relay service");

    // Missing credentials or upstream URL abort startup before anything binds.
    let config = RelayConfig::from_env()?;

    info!("Configuration:");
    info!("  STREAM_URL: {}", config.stream_url);
    info!("  WEBSOCKET_PORT: {}", config.websocket_port);
    info!("  METRICS_PORT: {}", config.metrics_port);
    info!(
        "  TRENDS_API_URL: {}",
        config.trends_api_url.as_deref().unwrap_or("(disabled)")
    );

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()?;
    info!("Prometheus metrics server started on port {}", config.metrics_port);

    let connections = Arc::new(ConnectionTable::new());
    let (hub_tx, hub_rx) = mpsc::unbounded_channel();

    let upstream = WsUpstream::new(
        UpstreamSettings::new(config.stream_url.clone(), config.stream_token.clone()),
        hub_tx.clone(),
    );
    let trends = config
        .trends_api_url
        .clone()
        .map(|url| TrendsClient::new(url, config.trends_api_token.clone()));
    let hub = Hub::new(upstream, connections.clone(), trends);

    let (hub_shutdown_tx, hub_shutdown_rx) = mpsc::channel(1);
    let hub_handle = tokio::spawn(hub.run(hub_rx, hub_shutdown_rx));

    let state = Arc::new(AppState {
        connections,
        hub_tx,
    });
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.websocket_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Relay listening on {}", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {:?}", e);
    }

    info!("Shutting down hub...");
    let _ = hub_shutdown_tx.send(()).await;
    let _ = hub_handle.await;

    info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}

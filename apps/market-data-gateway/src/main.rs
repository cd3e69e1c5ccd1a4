//! Market Data Gateway Binary
//!
//! Starts the resilient market data gateway.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-data-gateway
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `GATEWAY_PRIMARY_API_URL`: Primary provider REST base URL
//! - `GATEWAY_PRIMARY_WS_URL`: Primary provider push feed URL
//!
//! ## Optional
//! - `GATEWAY_PRIMARY_API_KEY`: Primary provider API key
//! - `GATEWAY_SECONDARY_API_URL`: Secondary provider REST base URL
//! - `GATEWAY_SUBSCRIBE_KEYS`: Comma-separated keys to subscribe at startup
//! - `GATEWAY_OPS_PORT`: Health/metrics HTTP port (default: 8091)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `RUST_LOG`: Log level (default: info)
//!
//! The full tuning surface (queue capacity, batch size, breaker windows,
//! cache TTL, health thresholds, reconnect policy) is documented in
//! `infrastructure::config`.

use std::sync::Arc;

use market_data_gateway::infrastructure::telemetry;
use market_data_gateway::{
    GatewayConfig, MarketDataGateway, OpsServer, OpsServerState, PrimaryClient, PrimaryConfig,
    SecondaryClient, SecondaryConfig, WsTransport, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Market Data Gateway");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = GatewayConfig::from_env()?;
    log_config(&config);

    // Build provider adapters
    let primary = {
        let mut primary_config = PrimaryConfig::new(config.providers.primary_api_url.clone());
        primary_config.api_key = config
            .providers
            .primary_credentials
            .as_ref()
            .map(|c| c.api_key().to_string());
        primary_config.request_timeout = config.providers.request_timeout;
        primary_config.book_depth = config.providers.book_depth;
        Arc::new(PrimaryClient::new(primary_config)?)
    };

    let secondary = match &config.providers.secondary_api_url {
        Some(url) => {
            let mut secondary_config = SecondaryConfig::new(url.clone());
            secondary_config.request_timeout = config.providers.request_timeout;
            Some(Arc::new(SecondaryClient::new(secondary_config)?)
                as Arc<dyn market_data_gateway::MarketDataProvider>)
        }
        None => {
            tracing::warn!("No secondary provider configured; fallback tier disabled");
            None
        }
    };

    let transport = Arc::new(WsTransport::new(config.providers.primary_ws_url.clone()));

    // Assemble and start the gateway
    let gateway = MarketDataGateway::new(&config, primary, secondary, transport);
    gateway.start();

    // Startup subscriptions
    if let Ok(keys) = std::env::var("GATEWAY_SUBSCRIBE_KEYS") {
        let keys: Vec<String> = keys
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .collect();
        if !keys.is_empty() {
            tracing::info!(count = keys.len(), "Subscribing startup keys");
            if let Err(e) = gateway.subscribe(&keys) {
                tracing::error!(error = %e, "Startup subscription failed");
            }
        }
    }

    // Ops server
    let ops_cancel = CancellationToken::new();
    let ops_state = Arc::new(OpsServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&gateway),
    ));
    let ops_server = OpsServer::new(config.server.ops_port, ops_state, ops_cancel.clone());
    tokio::spawn(async move {
        if let Err(e) = ops_server.run().await {
            tracing::error!(error = %e, "Ops server error");
        }
    });

    tracing::info!("Gateway ready");

    await_shutdown().await;

    ops_cancel.cancel();
    gateway.shutdown();

    tracing::info!("Gateway stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &GatewayConfig) {
    tracing::info!(
        primary_api = %config.providers.primary_api_url,
        primary_ws = %config.providers.primary_ws_url,
        secondary = config.providers.secondary_api_url.is_some(),
        ops_port = config.server.ops_port,
        "Configuration loaded"
    );
    tracing::debug!(
        queue_capacity = config.stream.queue_capacity,
        batch_size = config.stream.batch_size,
        cache_ttl_secs = config.cache_ttl.as_secs(),
        segment_limit = config.candle_segment_limit,
        "Tuning parameters"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}

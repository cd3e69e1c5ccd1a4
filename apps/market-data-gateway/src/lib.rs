#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Market Data Gateway - Resilient Data Acquisition
//!
//! Keeps downstream decision engines (regime detection, signal fusion,
//! backtesting) fed with quotes, order books, and historical candles
//! despite an unreliable primary provider, intermittent network failures,
//! and a secondary provider with a different wire format.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Canonical records and pure logic
//!   - `market`: quotes, candles, books, provenance/quality tags
//!   - `sequence`: per-key sequence tracking and gap detection
//!   - `validation`: payload invariant checks
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: provider and stream-transport interfaces
//!   - `services`: the gateway facade
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `resilience`: breaker, health monitor, retry, cache, fallback chain
//!   - `stream`: push-feed client, bounded queue, recovery scheduler
//!   - `providers`: primary/secondary HTTP clients, codec, WS transport
//!   - `config`, `ops`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! push feed ──► bounded queue ──► batch processor ──► snapshot cache ──► consumers
//!                                      │ gap                ▲
//!                                      ▼                    │ install
//!                              recovery scheduler ──► fallback chain
//!                                                     (primary → secondary → cache)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Canonical market data types and pure logic.
pub mod domain;

/// Application layer - Ports and the gateway service.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{
    Candle, CandlePeriod, DataSource, ExchangeRate, Fetched, OrderBookSnapshot, PriceLevel,
    QualityVerdict, Quote, RequestKey,
};
pub use domain::sequence::{GapStats, SequenceOutcome, SequenceTracker};
pub use domain::validation::Validate;

// Ports
pub use application::ports::{
    MarketDataProvider, ProviderError, StreamConnection, StreamTransport, TransportEvent,
};

// Gateway service
pub use application::services::MarketDataGateway;

// Resilience
pub use infrastructure::resilience::{
    BreakerConfig, CallSpec, FallbackConfig, FallbackOrchestrator, FetchError, HealthMonitorConfig,
    HealthStatus, KeyedCircuitBreaker, LastGoodCache, ProviderHealthMonitor, ProviderStatus,
    RetryPolicy,
};

// Streaming
pub use infrastructure::stream::{
    BoundedQueue, ConnectionState, QueueStats, ReconnectConfig, RecoveryConfig, RecoveryHandler,
    RecoveryScheduler, RecoveryStats, StreamClientError, StreamIngestClient, StreamSettings,
    StreamStats,
};

// Providers
pub use infrastructure::providers::{
    FeedCodec, FeedFrame, PrimaryClient, PrimaryConfig, SecondaryClient, SecondaryConfig,
    SubscriptionRequest, WsTransport,
};

// Infrastructure config
pub use infrastructure::config::{ApiCredentials, ConfigError, GatewayConfig, ServerSettings};

// Ops server
pub use infrastructure::ops::{OpsServer, OpsServerError, OpsServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};

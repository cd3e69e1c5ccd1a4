//! Gateway Configuration
//!
//! Configuration types loaded from environment variables. Every tunable has
//! a production default baked into its settings struct's `Default`.

use std::time::Duration;

use crate::infrastructure::resilience::fallback::FallbackConfig;
use crate::infrastructure::resilience::{BreakerConfig, HealthMonitorConfig, RetryPolicy};
use crate::infrastructure::stream::{ReconnectConfig, RecoveryConfig, StreamSettings};

// =============================================================================
// Credentials
// =============================================================================

/// API credentials for the primary provider.
#[derive(Clone)]
pub struct ApiCredentials {
    api_key: String,
}

impl ApiCredentials {
    /// Wrap an API key.
    #[must_use]
    pub const fn new(api_key: String) -> Self {
        Self { api_key }
    }

    /// The raw key, for request headers.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Settings Groups
// =============================================================================

/// Upstream provider endpoints.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Primary REST base URL.
    pub primary_api_url: String,
    /// Primary push-feed WebSocket URL.
    pub primary_ws_url: String,
    /// Optional primary API key.
    pub primary_credentials: Option<ApiCredentials>,
    /// Secondary REST base URL; fallback tier is skipped when unset.
    pub secondary_api_url: Option<String>,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// Book depth for point-in-time snapshot fetches.
    pub book_depth: u32,
}

/// Ops HTTP server ports.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health/metrics HTTP port.
    pub ops_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { ops_port: 8091 }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Provider endpoints and credentials.
    pub providers: ProviderSettings,
    /// Streaming client settings.
    pub stream: StreamSettings,
    /// Recovery scheduler settings.
    pub recovery: RecoveryConfig,
    /// Request-path resilience settings.
    pub fallback: FallbackConfig,
    /// Last-known-good cache TTL.
    pub cache_ttl: Duration,
    /// Row limit per historical sub-range fetch.
    pub candle_segment_limit: u32,
    /// Ops server ports.
    pub server: ServerSettings,
}

impl GatewayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let primary_api_url = require_env("GATEWAY_PRIMARY_API_URL")?;
        let primary_ws_url = require_env("GATEWAY_PRIMARY_WS_URL")?;

        let primary_credentials = std::env::var("GATEWAY_PRIMARY_API_KEY")
            .ok()
            .filter(|v| !v.is_empty())
            .map(ApiCredentials::new);

        let secondary_api_url = std::env::var("GATEWAY_SECONDARY_API_URL")
            .ok()
            .filter(|v| !v.is_empty());

        let providers = ProviderSettings {
            primary_api_url,
            primary_ws_url,
            primary_credentials,
            secondary_api_url,
            request_timeout: parse_env_duration_secs("GATEWAY_REQUEST_TIMEOUT_SECS", 10),
            book_depth: parse_env_u32("GATEWAY_BOOK_DEPTH", 50),
        };

        let defaults = StreamSettings::default();
        let stream = StreamSettings {
            connect_timeout: parse_env_duration_secs("GATEWAY_CONNECT_TIMEOUT_SECS", 30),
            reconnect: ReconnectConfig {
                initial_delay: parse_env_duration_millis("GATEWAY_RECONNECT_DELAY_MS", 1_000),
                max_attempts: parse_env_u32("GATEWAY_MAX_RECONNECT_ATTEMPTS", 10),
                ..ReconnectConfig::default()
            },
            queue_capacity: parse_env_usize("GATEWAY_QUEUE_CAPACITY", defaults.queue_capacity),
            batch_size: parse_env_usize("GATEWAY_BATCH_SIZE", defaults.batch_size),
            process_interval: parse_env_duration_millis("GATEWAY_PROCESS_INTERVAL_MS", 100),
            freshness: parse_env_duration_secs("GATEWAY_FRESHNESS_SECS", 5),
            sweep_interval: parse_env_duration_secs("GATEWAY_SWEEP_INTERVAL_SECS", 60),
            snapshot_max_age: parse_env_duration_secs("GATEWAY_SNAPSHOT_MAX_AGE_SECS", 3_600),
            snapshot_capacity: parse_env_usize(
                "GATEWAY_SNAPSHOT_CAPACITY",
                defaults.snapshot_capacity,
            ),
            max_subscriptions: parse_env_usize(
                "GATEWAY_MAX_SUBSCRIPTIONS",
                defaults.max_subscriptions,
            ),
            ..defaults
        };

        let recovery = RecoveryConfig {
            max_concurrent: parse_env_usize("GATEWAY_RECOVERY_CONCURRENCY", 2),
            min_spacing: parse_env_duration_millis("GATEWAY_RECOVERY_SPACING_MS", 1_000),
            ..RecoveryConfig::default()
        };

        let fallback = FallbackConfig {
            retry: RetryPolicy {
                max_attempts: parse_env_u32("GATEWAY_RETRY_MAX_ATTEMPTS", 3),
                ..RetryPolicy::default()
            },
            breaker: BreakerConfig {
                failure_threshold: parse_env_u32("GATEWAY_BREAKER_THRESHOLD", 3),
                reset_window: parse_env_duration_secs("GATEWAY_BREAKER_RESET_SECS", 300),
                cooldown: parse_env_duration_secs("GATEWAY_BREAKER_COOLDOWN_SECS", 60),
            },
            health: HealthMonitorConfig {
                check_interval: parse_env_duration_secs("GATEWAY_HEALTH_CHECK_INTERVAL_SECS", 30),
                latency_threshold: parse_env_duration_millis(
                    "GATEWAY_HEALTH_LATENCY_THRESHOLD_MS",
                    700,
                ),
                ..HealthMonitorConfig::default()
            },
        };

        Ok(Self {
            providers,
            stream,
            recovery,
            fallback,
            cache_ttl: parse_env_duration_secs("GATEWAY_CACHE_TTL_SECS", 30),
            candle_segment_limit: parse_env_u32("GATEWAY_CANDLE_SEGMENT_LIMIT", 500),
            server: ServerSettings {
                ops_port: parse_env_u16("GATEWAY_OPS_PORT", ServerSettings::default().ops_port),
            },
        })
    }
}

// =============================================================================
// Errors & Parse Helpers
// =============================================================================

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn require_env(key: &str) -> Result<String, ConfigError> {
    let value =
        std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default_secs: u64) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(Duration::from_secs(default_secs), Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default_millis: u64) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(Duration::from_millis(default_millis), Duration::from_millis)
}

// =============================================================================
// Tests
// =============================================================================

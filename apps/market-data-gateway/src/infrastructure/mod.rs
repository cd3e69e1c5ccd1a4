//! Infrastructure layer - Adapters and external integrations.

/// Environment-driven configuration.
pub mod config;

/// Prometheus metrics registration and recorders.
pub mod metrics;

/// Ops HTTP endpoint (health, readiness, metrics).
pub mod ops;

/// Provider adapters (HTTP clients, feed codec, WebSocket transport).
pub mod providers;

/// Request-path resilience (breaker, health, retry, cache, fallback).
pub mod resilience;

/// Streaming ingestion (client, queue, recovery, reconnect).
pub mod stream;

/// Tracing and OpenTelemetry initialization.
pub mod telemetry;

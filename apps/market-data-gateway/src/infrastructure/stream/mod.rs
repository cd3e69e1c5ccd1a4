//! Streaming ingestion: the push-feed client and its supporting machinery.

/// Push-feed client and order-book cache.
pub mod client;

/// Bounded drop-oldest ingress queue.
pub mod queue;

/// Reconnect backoff schedule.
pub mod reconnect;

/// Bounded-concurrency gap recovery scheduler.
pub mod recovery;

/// Streaming client settings.
pub mod settings;

pub use client::{ConnectionState, StreamClientError, StreamIngestClient, StreamStats};
pub use queue::{BoundedQueue, QueueStats};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use recovery::{RecoveryConfig, RecoveryHandler, RecoveryScheduler, RecoveryStats};
pub use settings::StreamSettings;

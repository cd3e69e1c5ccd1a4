//! Streaming Client Settings

use std::time::Duration;

use super::reconnect::ReconnectConfig;

/// Tunables for the streaming ingestion client.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Deadline for one connection attempt.
    pub connect_timeout: Duration,
    /// Reconnect backoff schedule.
    pub reconnect: ReconnectConfig,
    /// Keepalive ping interval.
    pub heartbeat_interval: Duration,
    /// Silence window after which the connection is considered dead.
    pub heartbeat_timeout: Duration,
    /// Ingress queue capacity.
    pub queue_capacity: usize,
    /// Frames processed per ticker tick.
    pub batch_size: usize,
    /// Batch processor tick interval.
    pub process_interval: Duration,
    /// Maximum snapshot age served without a point-in-time refetch.
    pub freshness: Duration,
    /// Eviction sweep interval.
    pub sweep_interval: Duration,
    /// Age beyond which non-subscribed snapshots are evicted.
    pub snapshot_max_age: Duration,
    /// Snapshot count ceiling enforced by the sweep.
    pub snapshot_capacity: usize,
    /// Maximum keys in the subscription set.
    pub max_subscriptions: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            queue_capacity: 500,
            batch_size: 10,
            process_interval: Duration::from_millis(100),
            freshness: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(60),
            snapshot_max_age: Duration::from_secs(3600),
            snapshot_capacity: 100,
            max_subscriptions: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let settings = StreamSettings::default();
        assert_eq!(settings.connect_timeout, Duration::from_secs(30));
        assert_eq!(settings.queue_capacity, 500);
        assert_eq!(settings.batch_size, 10);
        assert_eq!(settings.process_interval, Duration::from_millis(100));
        assert_eq!(settings.snapshot_capacity, 100);
        assert_eq!(settings.snapshot_max_age, Duration::from_secs(3600));
    }
}

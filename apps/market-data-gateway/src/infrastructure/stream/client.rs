//! Streaming Ingestion Client
//!
//! Maintains the persistent push connection and the in-memory order-book
//! cache. Message handling is two-phase to bound memory and CPU:
//!
//! - **Phase 1 (ingress)**: every inbound frame goes straight into the
//!   bounded queue. At capacity the oldest pending frame is dropped; the
//!   transport read loop never blocks and never grows a buffer unboundedly.
//! - **Phase 2 (processing)**: a fixed-interval ticker drains a bounded
//!   batch, decodes each frame, runs sequence-gap detection, replaces the
//!   snapshot wholesale, and notifies registered callbacks synchronously in
//!   registration order.
//!
//! Snapshot-structure mutation is confined to phase 2 and the
//! eviction/recovery routines; ingress never touches the maps.
//!
//! Connection lifecycle: `disconnected → connecting → connected →
//! (reconnecting) → …`. A connect attempt that does not complete within its
//! timeout is failed and retried under the reconnect policy; exhausting the
//! policy leaves the client disconnected until manually restarted. The full
//! subscription set is replayed on every reconnect.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ProviderError, StreamConnection, StreamTransport, TransportEvent};
use crate::domain::market::OrderBookSnapshot;
use crate::domain::sequence::{GapStats, SequenceTracker};
use crate::infrastructure::metrics;
use crate::infrastructure::providers::codec::{BookFrame, FeedCodec, FeedFrame, SubscriptionRequest};

use super::queue::{BoundedQueue, QueueStats};
use super::recovery::RecoveryScheduler;
use super::settings::StreamSettings;

// =============================================================================
// Errors
// =============================================================================

/// Errors from the streaming client's public surface.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// The subscription set is at its configured limit.
    #[error("subscription limit of {limit} keys reached")]
    SubscriptionLimit {
        /// Configured maximum subscribed keys.
        limit: usize,
    },
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection and none being attempted.
    Disconnected,
    /// Connection attempt in flight.
    Connecting,
    /// Live session established.
    Connected,
    /// Waiting out a reconnect delay.
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Why a live session ended.
enum SessionEnd {
    Cancelled,
    Closed,
    Failed,
}

/// Diagnostics snapshot of the streaming side.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStats {
    /// Current connection state.
    pub state: ConnectionState,
    /// Frames received from the transport.
    pub messages_received: u64,
    /// Ingress queue counters.
    pub queue: QueueStats,
    /// Snapshots currently cached.
    pub snapshot_count: usize,
    /// Keys currently subscribed.
    pub subscription_count: usize,
    /// Snapshots removed by the eviction sweep.
    pub evicted: u64,
}

type UpdateCallback = Box<dyn Fn(&OrderBookSnapshot) + Send + Sync>;

// =============================================================================
// Client
// =============================================================================

/// Push-feed client owning the order-book cache.
pub struct StreamIngestClient {
    settings: StreamSettings,
    transport: Arc<dyn StreamTransport>,
    codec: FeedCodec,
    queue: BoundedQueue<String>,
    state: RwLock<ConnectionState>,
    snapshots: RwLock<HashMap<String, OrderBookSnapshot>>,
    sequences: Mutex<SequenceTracker>,
    subscriptions: RwLock<HashSet<String>>,
    callbacks: RwLock<Vec<UpdateCallback>>,
    recovery: Arc<RecoveryScheduler>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    recovery_triggered: AtomicU64,
    messages_received: AtomicU64,
    evicted: AtomicU64,
    shutdown_done: AtomicBool,
    cancel: CancellationToken,
}

impl StreamIngestClient {
    /// Create a client. Call [`Self::start`] to spawn its background loops.
    #[must_use]
    pub fn new(
        settings: StreamSettings,
        transport: Arc<dyn StreamTransport>,
        recovery: Arc<RecoveryScheduler>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let queue = BoundedQueue::new(settings.queue_capacity);
        Arc::new(Self {
            settings,
            transport,
            codec: FeedCodec::new(),
            queue,
            state: RwLock::new(ConnectionState::Disconnected),
            snapshots: RwLock::new(HashMap::new()),
            sequences: Mutex::new(SequenceTracker::new()),
            subscriptions: RwLock::new(HashSet::new()),
            callbacks: RwLock::new(Vec::new()),
            recovery,
            outbound: Mutex::new(None),
            recovery_triggered: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            shutdown_done: AtomicBool::new(false),
            cancel,
        })
    }

    /// Spawn the connection loop, the batch processor, and the eviction
    /// sweeper. All three stop when the cancellation token fires.
    pub fn start(self: &Arc<Self>) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            client.run().await;
        });

        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(client.settings.process_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = client.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = client.process_pending();
                    }
                }
            }
        });

        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(client.settings.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = client.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = client.run_eviction_sweep();
                    }
                }
            }
        });
    }

    // =========================================================================
    // Connection Loop
    // =========================================================================

    /// Run the connection loop until cancelled or the reconnect budget is
    /// spent.
    pub async fn run(self: Arc<Self>) {
        let mut policy = super::reconnect::ReconnectPolicy::new(self.settings.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Connecting);

            let connected = tokio::time::timeout(
                self.settings.connect_timeout,
                self.transport.connect(),
            )
            .await;

            match connected {
                Ok(Ok(mut conn)) => {
                    self.set_state(ConnectionState::Connected);
                    policy.reset();
                    tracing::info!("Stream connected");

                    // Subscriptions are not assumed to survive a reconnect.
                    self.replay_subscriptions(conn.as_mut()).await;

                    let reason = self.run_session(conn.as_mut()).await;

                    // Stop feeding the session writer before closing, so a
                    // close-triggered event cannot race shutdown teardown.
                    self.outbound.lock().take();
                    conn.close().await;

                    match reason {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Closed => tracing::warn!("Stream session closed by peer"),
                        SessionEnd::Failed => tracing::warn!("Stream session failed"),
                    }
                }
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "Stream connect failed");
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = self.settings.connect_timeout.as_secs(),
                        "Stream connect timed out"
                    );
                }
            }

            self.set_state(ConnectionState::Reconnecting);
            match policy.next_delay() {
                Some(delay) => {
                    tracing::info!(
                        attempt = policy.attempt_count(),
                        delay_ms = delay.as_millis(),
                        "Reconnecting to stream"
                    );
                    metrics::record_reconnect();

                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    tracing::error!(
                        attempts = policy.attempt_count(),
                        "Reconnect attempts exhausted; stream offline until restarted"
                    );
                    break;
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
    }

    /// Replay the full subscription set on a fresh connection.
    async fn replay_subscriptions(&self, conn: &mut dyn StreamConnection) {
        let keys: Vec<String> = self.subscriptions.read().iter().cloned().collect();
        if keys.is_empty() {
            return;
        }

        match self.codec.encode(&SubscriptionRequest::subscribe(keys)) {
            Ok(frame) => {
                if let Err(err) = conn.send_text(frame).await {
                    tracing::warn!(error = %err, "Failed to replay subscriptions");
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to encode subscription replay");
            }
        }
    }

    /// Drive one live session until it ends.
    async fn run_session(&self, conn: &mut dyn StreamConnection) -> SessionEnd {
        /// What the session loop decided to do next. Resolved before
        /// touching the connection again, so only one borrow of `conn` is
        /// live at a time.
        enum Step {
            Cancelled,
            Ping,
            Send(String),
            Event(Option<Result<TransportEvent, ProviderError>>),
        }

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        *self.outbound.lock() = Some(out_tx);

        let mut heartbeat = tokio::time::interval(self.settings.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; consume it.
        heartbeat.tick().await;
        let mut last_seen = Instant::now();

        loop {
            let step = tokio::select! {
                () = self.cancel.cancelled() => Step::Cancelled,
                _ = heartbeat.tick() => Step::Ping,
                Some(frame) = out_rx.recv() => Step::Send(frame),
                event = conn.next_event() => Step::Event(event),
            };

            match step {
                Step::Cancelled => return SessionEnd::Cancelled,
                Step::Ping => {
                    if last_seen.elapsed() > self.settings.heartbeat_timeout {
                        tracing::warn!("Heartbeat timeout, dropping connection");
                        return SessionEnd::Failed;
                    }
                    if conn.send_ping().await.is_err() {
                        return SessionEnd::Failed;
                    }
                }
                Step::Send(frame) => {
                    if let Err(err) = conn.send_text(frame).await {
                        tracing::warn!(error = %err, "Failed to send outbound frame");
                        return SessionEnd::Failed;
                    }
                }
                Step::Event(event) => match event {
                    Some(Ok(TransportEvent::Message(text))) => {
                        last_seen = Instant::now();
                        self.ingest_frame(text);
                    }
                    Some(Ok(TransportEvent::Pong)) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(TransportEvent::Closed)) | None => return SessionEnd::Closed,
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "Stream transport error");
                        return SessionEnd::Failed;
                    }
                },
            }
        }
    }

    // =========================================================================
    // Phase 1: Ingress
    // =========================================================================

    /// Enqueue one raw inbound frame.
    ///
    /// Never blocks and never touches the snapshot maps.
    pub fn ingest_frame(&self, raw: String) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        metrics::record_message_ingested();

        if self.queue.push(raw) {
            metrics::record_message_dropped();
        }
    }

    // =========================================================================
    // Phase 2: Processing
    // =========================================================================

    /// Drain and process one bounded batch. Returns the batch size.
    pub fn process_pending(&self) -> usize {
        let batch = self.queue.drain(self.settings.batch_size);
        let count = batch.len();
        if count == 0 {
            return 0;
        }

        let started = Instant::now();
        for raw in &batch {
            self.handle_frame(raw);
        }
        metrics::record_batch_processed(count, started.elapsed());
        count
    }

    fn handle_frame(&self, raw: &str) {
        match self.codec.decode(raw) {
            Ok(FeedFrame::Book(frame)) => self.apply_book_frame(frame),
            Ok(FeedFrame::Subscribed { keys }) => {
                tracing::debug!(count = keys.len(), "Subscription confirmed");
            }
            Ok(FeedFrame::Unsubscribed { keys }) => {
                tracing::debug!(count = keys.len(), "Unsubscription confirmed");
            }
            Ok(FeedFrame::Heartbeat) => {
                tracing::trace!("Feed heartbeat");
            }
            Ok(FeedFrame::Error { code, msg }) => {
                tracing::warn!(code, msg = %msg, "Feed error frame");
            }
            Err(err) => {
                tracing::warn!(error = %err, "Dropping undecodable frame");
            }
        }
    }

    fn apply_book_frame(&self, frame: BookFrame) {
        let outcome = self.sequences.lock().observe(&frame.key, frame.seq);

        if outcome.is_gap() {
            metrics::record_gap();
            if self.recovery.submit(&frame.key) {
                self.recovery_triggered.fetch_add(1, Ordering::Relaxed);
            }
        }

        let snapshot = frame.into_snapshot(Utc::now());
        let key = snapshot.key.clone();
        let count = {
            let mut snapshots = self.snapshots.write();
            snapshots.insert(key, snapshot.clone());
            snapshots.len()
        };
        metrics::set_snapshot_count(count);
        self.notify(&snapshot);
    }

    /// Invoke registered callbacks synchronously in registration order.
    ///
    /// A panicking consumer must not abort the remaining callbacks or the
    /// rest of the batch.
    fn notify(&self, snapshot: &OrderBookSnapshot) {
        let callbacks = self.callbacks.read();
        for callback in callbacks.iter() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(snapshot);
            }));
            if result.is_err() {
                tracing::error!(key = %snapshot.key, "Order book update callback panicked");
            }
        }
    }

    // =========================================================================
    // Eviction
    // =========================================================================

    /// Remove stale and excess snapshots.
    ///
    /// Subscribed keys are filtered out before both the age and capacity
    /// passes; staleness on a subscribed key is a health signal, not an
    /// eviction trigger. Returns the number of entries removed.
    pub fn run_eviction_sweep(&self) -> usize {
        let now = Utc::now();
        let max_age = chrono::Duration::from_std(self.settings.snapshot_max_age)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let subscribed = self.subscriptions.read().clone();

        let mut removed: Vec<String> = Vec::new();
        {
            let mut snapshots = self.snapshots.write();

            // Age pass.
            let stale: Vec<String> = snapshots
                .iter()
                .filter(|(key, snap)| {
                    !subscribed.contains(*key) && now - snap.ingest_time > max_age
                })
                .map(|(key, _)| key.clone())
                .collect();
            for key in stale {
                snapshots.remove(&key);
                removed.push(key);
            }

            // Capacity pass, oldest non-subscribed first.
            if snapshots.len() > self.settings.snapshot_capacity {
                let mut evictable: Vec<(String, chrono::DateTime<Utc>)> = snapshots
                    .iter()
                    .filter(|(key, _)| !subscribed.contains(*key))
                    .map(|(key, snap)| (key.clone(), snap.ingest_time))
                    .collect();
                evictable.sort_by_key(|(_, ingest_time)| *ingest_time);

                let excess = snapshots.len() - self.settings.snapshot_capacity;
                for (key, _) in evictable.into_iter().take(excess) {
                    snapshots.remove(&key);
                    removed.push(key);
                }
            }
        }

        if !removed.is_empty() {
            let mut sequences = self.sequences.lock();
            for key in &removed {
                sequences.forget(key);
            }
            drop(sequences);

            self.evicted.fetch_add(removed.len() as u64, Ordering::Relaxed);
            metrics::record_evictions(removed.len());
            metrics::set_snapshot_count(self.snapshots.read().len());
            tracing::debug!(count = removed.len(), "Evicted snapshots");
        }

        removed.len()
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Cached snapshot for a key regardless of age.
    #[must_use]
    pub fn snapshot(&self, key: &str) -> Option<OrderBookSnapshot> {
        self.snapshots.read().get(key).cloned()
    }

    /// Cached snapshot only if younger than the freshness threshold.
    #[must_use]
    pub fn fresh_snapshot(&self, key: &str) -> Option<OrderBookSnapshot> {
        let freshness = chrono::Duration::from_std(self.settings.freshness)
            .unwrap_or_else(|_| chrono::Duration::seconds(5));
        let now = Utc::now();

        self.snapshots
            .read()
            .get(key)
            .filter(|snap| now - snap.ingest_time <= freshness)
            .cloned()
    }

    /// Install an authoritative snapshot fetched outside the stream.
    ///
    /// Used by gap recovery and the point-in-time read path. Overwrites
    /// whatever is cached and resets the sequence baseline: the fresh
    /// snapshot wins regardless of its own sequence number, and a later
    /// in-stream update simply overwrites it again.
    pub fn install_snapshot(&self, snapshot: OrderBookSnapshot) {
        let key = snapshot.key.clone();
        self.sequences.lock().reset(&key);
        self.snapshots.write().insert(key, snapshot.clone());
        self.notify(&snapshot);
    }

    /// Whether a key is in the subscription set.
    #[must_use]
    pub fn is_subscribed(&self, key: &str) -> bool {
        self.subscriptions.read().contains(key)
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Add keys to the subscription set, sending the wire request when
    /// connected.
    pub fn subscribe(&self, keys: &[String]) -> Result<(), StreamClientError> {
        let added: Vec<String> = {
            let mut subs = self.subscriptions.write();
            let new_keys: Vec<String> = keys
                .iter()
                .filter(|key| !subs.contains(*key))
                .cloned()
                .collect();

            if subs.len() + new_keys.len() > self.settings.max_subscriptions {
                return Err(StreamClientError::SubscriptionLimit {
                    limit: self.settings.max_subscriptions,
                });
            }

            for key in &new_keys {
                subs.insert(key.clone());
            }
            metrics::set_subscription_count(subs.len());
            new_keys
        };

        if !added.is_empty() {
            self.send_request(&SubscriptionRequest::subscribe(added));
        }
        Ok(())
    }

    /// Remove keys from the subscription set, sending the wire request when
    /// connected.
    pub fn unsubscribe(&self, keys: &[String]) {
        let removed: Vec<String> = {
            let mut subs = self.subscriptions.write();
            let removed: Vec<String> = keys
                .iter()
                .filter(|key| subs.remove(*key))
                .cloned()
                .collect();
            metrics::set_subscription_count(subs.len());
            removed
        };

        if !removed.is_empty() {
            self.send_request(&SubscriptionRequest::unsubscribe(removed));
        }
    }

    /// Current subscription set.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.read().iter().cloned().collect()
    }

    fn send_request(&self, request: &SubscriptionRequest) {
        let Ok(frame) = self.codec.encode(request) else {
            tracing::error!("Failed to encode subscription request");
            return;
        };

        if let Some(tx) = self.outbound.lock().as_ref() {
            let _ = tx.send(frame);
        }
    }

    // =========================================================================
    // Observers & Diagnostics
    // =========================================================================

    /// Register a consumer notified on every applied snapshot update.
    pub fn on_order_book_update(
        &self,
        callback: impl Fn(&OrderBookSnapshot) + Send + Sync + 'static,
    ) {
        self.callbacks.write().push(Box::new(callback));
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Gap diagnostics. Read-only.
    #[must_use]
    pub fn gap_stats(&self) -> GapStats {
        let sequences = self.sequences.lock();
        GapStats {
            total_gaps_detected: sequences.total_gaps(),
            recovery_triggered: self.recovery_triggered.load(Ordering::Relaxed),
            last_gap_time: sequences.last_gap_time(),
        }
    }

    /// Diagnostics snapshot. Read-only.
    #[must_use]
    pub fn stats(&self) -> StreamStats {
        StreamStats {
            state: self.state(),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            queue: self.queue.stats(),
            snapshot_count: self.snapshots.read().len(),
            subscription_count: self.subscriptions.read().len(),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }

    /// Tear down the client. Idempotent.
    ///
    /// Cancels every timer and the session loop first (so no close-triggered
    /// reconnect can race the teardown), then clears all in-memory state.
    pub fn shutdown(&self) {
        if self.shutdown_done.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancel.cancel();
        self.outbound.lock().take();

        self.queue.clear();
        self.snapshots.write().clear();
        *self.sequences.lock() = SequenceTracker::new();
        self.subscriptions.write().clear();
        self.callbacks.write().clear();

        tracing::info!("Stream client shut down");
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        metrics::set_connection_state(state);
    }
}

// =============================================================================
// Tests
// =============================================================================

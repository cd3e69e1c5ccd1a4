//! Streaming Ingestion Integration Tests
//!
//! Drives the full client loop (connect, subscription replay, two-phase
//! processing, gap recovery scheduling, reconnect) against a scripted
//! in-memory transport.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use market_data_gateway::{
    ConnectionState, ProviderError, ReconnectConfig, RecoveryConfig, RecoveryScheduler,
    StreamConnection, StreamIngestClient, StreamSettings, StreamTransport, TransportEvent,
};

// =============================================================================
// Scripted Transport
// =============================================================================

type EventRx = mpsc::UnboundedReceiver<Result<TransportEvent, ProviderError>>;
type EventTx = mpsc::UnboundedSender<Result<TransportEvent, ProviderError>>;

/// One scripted session: the test pushes events, the connection records
/// everything the client sends.
struct ScriptedSession {
    events: EventRx,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl StreamConnection for ScriptedSession {
    async fn send_text(&mut self, payload: String) -> Result<(), ProviderError> {
        self.sent.lock().push(payload);
        Ok(())
    }

    async fn send_ping(&mut self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn next_event(&mut self) -> Option<Result<TransportEvent, ProviderError>> {
        self.events.recv().await
    }

    async fn close(&mut self) {}
}

/// Transport that hands out pre-scripted sessions in order.
struct ScriptedTransport {
    sessions: Mutex<VecDeque<ScriptedSession>>,
    connects: Arc<Mutex<usize>>,
}

impl ScriptedTransport {
    fn new() -> (Arc<Self>, Arc<Mutex<usize>>) {
        let connects = Arc::new(Mutex::new(0));
        (
            Arc::new(Self {
                sessions: Mutex::new(VecDeque::new()),
                connects: Arc::clone(&connects),
            }),
            connects,
        )
    }

    /// Queue a session; returns the handle the test pushes events with and
    /// the log of frames the client sent on it.
    fn add_session(&self) -> (EventTx, Arc<Mutex<Vec<String>>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        self.sessions.lock().push_back(ScriptedSession {
            events: rx,
            sent: Arc::clone(&sent),
        });
        (tx, sent)
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, ProviderError> {
        *self.connects.lock() += 1;
        self.sessions
            .lock()
            .pop_front()
            .map(|session| Box::new(session) as Box<dyn StreamConnection>)
            .ok_or_else(|| ProviderError::Network("no scripted session".to_string()))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn fast_settings() -> StreamSettings {
    StreamSettings {
        connect_timeout: Duration::from_millis(500),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 5,
        },
        heartbeat_interval: Duration::from_secs(60),
        heartbeat_timeout: Duration::from_secs(120),
        process_interval: Duration::from_millis(10),
        sweep_interval: Duration::from_secs(60),
        ..Default::default()
    }
}

fn client_with(
    transport: Arc<ScriptedTransport>,
) -> (Arc<StreamIngestClient>, CancellationToken) {
    let cancel = CancellationToken::new();
    let client = StreamIngestClient::new(
        fast_settings(),
        transport,
        RecoveryScheduler::new(RecoveryConfig::default()),
        cancel.clone(),
    );
    (client, cancel)
}

fn book_json(key: &str, seq: u64) -> String {
    format!(
        r#"{{"type":"book","key":"{key}","seq":{seq},"ts":1700000000000,
            "bids":[["100.0","1.0"]],"asks":[["100.5","1.0"]]}}"#
    )
}

fn message(text: String) -> Result<TransportEvent, ProviderError> {
    Ok(TransportEvent::Message(text))
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn connects_and_applies_streamed_snapshots() {
    let (transport, _connects) = ScriptedTransport::new();
    let (events, _sent) = transport.add_session();

    let (client, cancel) = client_with(transport);
    client.subscribe(&["BTC-USD".to_string()]).unwrap();
    client.start();

    for seq in 1..=3 {
        events.send(message(book_json("BTC-USD", seq))).unwrap();
    }
    settle().await;

    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(client.snapshot("BTC-USD").is_some());
    assert_eq!(client.gap_stats().total_gaps_detected, 0);
    assert_eq!(client.stats().messages_received, 3);

    cancel.cancel();
}

#[tokio::test]
async fn replays_subscriptions_on_connect() {
    let (transport, _connects) = ScriptedTransport::new();
    let (_events, sent) = transport.add_session();

    let (client, cancel) = client_with(transport);
    client
        .subscribe(&["BTC-USD".to_string(), "ETH-USD".to_string()])
        .unwrap();
    client.start();
    settle().await;

    let frames = sent.lock().clone();
    assert_eq!(frames.len(), 1, "expected one subscription replay frame");
    assert!(frames[0].contains("subscribe"));
    assert!(frames[0].contains("BTC-USD"));
    assert!(frames[0].contains("ETH-USD"));

    cancel.cancel();
}

#[tokio::test]
async fn gap_in_stream_schedules_recovery() {
    let (transport, _connects) = ScriptedTransport::new();
    let (events, _sent) = transport.add_session();

    let (client, cancel) = client_with(transport);
    client.subscribe(&["BTC-USD".to_string()]).unwrap();
    client.start();

    for seq in [1, 2, 3, 7] {
        events.send(message(book_json("BTC-USD", seq))).unwrap();
    }
    settle().await;

    let stats = client.gap_stats();
    assert_eq!(stats.total_gaps_detected, 1);
    assert_eq!(stats.recovery_triggered, 1);
    assert!(stats.last_gap_time.is_some());

    cancel.cancel();
}

#[tokio::test]
async fn reconnects_and_resubscribes_after_close() {
    let (transport, connects) = ScriptedTransport::new();
    let (first_events, first_sent) = transport.add_session();
    let (_second_events, second_sent) = transport.add_session();

    let (client, cancel) = client_with(transport);
    client.subscribe(&["BTC-USD".to_string()]).unwrap();
    client.start();
    settle().await;

    assert_eq!(*connects.lock(), 1);
    assert_eq!(first_sent.lock().len(), 1);

    // Server closes; the client must reconnect and replay subscriptions.
    first_events.send(Ok(TransportEvent::Closed)).unwrap();
    settle().await;

    assert_eq!(*connects.lock(), 2);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(second_sent.lock().len(), 1);
    assert!(second_sent.lock()[0].contains("BTC-USD"));

    cancel.cancel();
}

#[tokio::test]
async fn reconnect_budget_exhaustion_leaves_client_disconnected() {
    // Transport with no scripted sessions: every connect attempt fails.
    let (transport, connects) = ScriptedTransport::new();

    let (client, cancel) = client_with(transport);
    client.start();

    tokio::time::sleep(Duration::from_millis(400)).await;

    // Initial attempt plus five scheduled reconnects, then permanent stop.
    assert_eq!(*connects.lock(), 6);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    cancel.cancel();
}

#[tokio::test]
async fn updates_reach_registered_consumers_in_order() {
    let (transport, _connects) = ScriptedTransport::new();
    let (events, _sent) = transport.add_session();

    let (client, cancel) = client_with(transport);
    client.subscribe(&["BTC-USD".to_string()]).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    client.on_order_book_update(move |snapshot| {
        sink.lock().push(snapshot.key.clone());
    });

    client.start();
    for seq in 1..=4 {
        events.send(message(book_json("BTC-USD", seq))).unwrap();
    }
    settle().await;

    assert_eq!(seen.lock().len(), 4);

    cancel.cancel();
}

#[tokio::test]
async fn shutdown_stops_the_session_loop() {
    let (transport, _connects) = ScriptedTransport::new();
    let (events, _sent) = transport.add_session();

    let (client, cancel) = client_with(transport);
    client.subscribe(&["BTC-USD".to_string()]).unwrap();
    client.start();
    settle().await;

    client.shutdown();
    settle().await;

    assert_eq!(client.state(), ConnectionState::Disconnected);
    // Frames after shutdown go nowhere and must not be applied.
    let _ = events.send(message(book_json("BTC-USD", 99)));
    settle().await;
    assert!(client.snapshot("BTC-USD").is_none());

    cancel.cancel();
}

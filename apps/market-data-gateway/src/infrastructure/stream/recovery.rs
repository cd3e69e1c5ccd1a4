//! Recovery Scheduler
//!
//! Serializes "re-synchronize this key" work so a burst of gap events cannot
//! become a recovery storm: bounded concurrency, a minimum spacing between
//! job starts, and coalescing of duplicate submissions for a key that is
//! already pending or running.
//!
//! Failures are retried by the scheduler's own backoff and never propagate
//! to streaming consumers; a late correct snapshot beats an error.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use crate::application::ports::ProviderError;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the recovery scheduler.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Maximum recovery jobs running at once.
    pub max_concurrent: usize,
    /// Minimum spacing between job starts.
    pub min_spacing: Duration,
    /// Attempts per key before the job is abandoned.
    pub max_attempts: u32,
    /// Delay before a failed job is resubmitted.
    pub retry_delay: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            min_spacing: Duration::from_secs(1),
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Handler Port
// =============================================================================

/// Performs one recovery: fetch a fresh authoritative snapshot for a key and
/// install it.
#[async_trait]
pub trait RecoveryHandler: Send + Sync {
    /// Re-synchronize one key.
    async fn recover(&self, key: &str) -> Result<(), ProviderError>;
}

// =============================================================================
// Stats
// =============================================================================

/// Counter snapshot for diagnostics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RecoveryStats {
    /// Jobs accepted into the queue.
    pub submitted: u64,
    /// Submissions coalesced into an already-pending job.
    pub coalesced: u64,
    /// Jobs that completed successfully.
    pub completed: u64,
    /// Jobs abandoned after exhausting their attempts.
    pub failed: u64,
    /// Individual attempt failures that were retried.
    pub retried: u64,
}

// =============================================================================
// Scheduler
// =============================================================================

#[derive(Debug)]
struct Job {
    key: String,
    attempt: u32,
}

/// Bounded-concurrency, rate-limited recovery job queue.
pub struct RecoveryScheduler {
    config: RecoveryConfig,
    tx: mpsc::UnboundedSender<Job>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
    pending: Arc<Mutex<HashSet<String>>>,
    submitted: AtomicU64,
    coalesced: AtomicU64,
    completed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    retried: Arc<AtomicU64>,
}

impl RecoveryScheduler {
    /// Create a scheduler. `run` must be called once to start the worker.
    #[must_use]
    pub fn new(config: RecoveryConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            config,
            tx,
            rx: Mutex::new(Some(rx)),
            pending: Arc::new(Mutex::new(HashSet::new())),
            submitted: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            completed: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
            retried: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Submit a recovery job for a key.
    ///
    /// Returns `false` when the key already has a job pending or running;
    /// the duplicate is coalesced rather than queued.
    pub fn submit(&self, key: &str) -> bool {
        {
            let mut pending = self.pending.lock();
            if !pending.insert(key.to_string()) {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "Recovery already pending, coalescing");
                return false;
            }
        }

        self.submitted.fetch_add(1, Ordering::Relaxed);
        metrics::record_recovery_scheduled();

        if self
            .tx
            .send(Job {
                key: key.to_string(),
                attempt: 0,
            })
            .is_err()
        {
            // Worker gone (shutdown); drop the reservation.
            self.pending.lock().remove(key);
            return false;
        }

        true
    }

    /// Start the worker loop. Subsequent calls are no-ops.
    pub fn run(self: &Arc<Self>, handler: Arc<dyn RecoveryHandler>, cancel: CancellationToken) {
        let Some(mut rx) = self.rx.lock().take() else {
            return;
        };

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(scheduler.config.max_concurrent));
            let mut next_start = tokio::time::Instant::now();

            loop {
                let job = tokio::select! {
                    () = cancel.cancelled() => break,
                    job = rx.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                };

                // Enforce minimum spacing between job starts.
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep_until(next_start) => {}
                }

                let permit = tokio::select! {
                    () = cancel.cancelled() => break,
                    permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                next_start = tokio::time::Instant::now() + scheduler.config.min_spacing;
                scheduler.spawn_job(job, permit, Arc::clone(&handler), cancel.clone());
            }

            tracing::info!("Recovery scheduler stopped");
        });
    }

    fn spawn_job(
        self: &Arc<Self>,
        job: Job,
        permit: tokio::sync::OwnedSemaphorePermit,
        handler: Arc<dyn RecoveryHandler>,
        cancel: CancellationToken,
    ) {
        let scheduler = Arc::clone(self);

        tokio::spawn(async move {
            let result = handler.recover(&job.key).await;
            drop(permit);

            match result {
                Ok(()) => {
                    scheduler.completed.fetch_add(1, Ordering::Relaxed);
                    scheduler.pending.lock().remove(&job.key);
                    metrics::record_recovery_result(true);
                    tracing::info!(key = %job.key, attempt = job.attempt, "Recovery completed");
                }
                Err(err) => {
                    let next_attempt = job.attempt + 1;
                    if next_attempt < scheduler.config.max_attempts {
                        scheduler.retried.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            key = %job.key,
                            attempt = job.attempt,
                            error = %err,
                            "Recovery attempt failed, will retry"
                        );

                        // Keep the pending reservation across the retry so
                        // duplicate gap events stay coalesced.
                        tokio::select! {
                            () = cancel.cancelled() => {
                                scheduler.pending.lock().remove(&job.key);
                            }
                            () = tokio::time::sleep(scheduler.config.retry_delay) => {
                                let resubmitted = scheduler.tx.send(Job {
                                    key: job.key.clone(),
                                    attempt: next_attempt,
                                });
                                if resubmitted.is_err() {
                                    scheduler.pending.lock().remove(&job.key);
                                }
                            }
                        }
                    } else {
                        scheduler.failed.fetch_add(1, Ordering::Relaxed);
                        scheduler.pending.lock().remove(&job.key);
                        metrics::record_recovery_result(false);
                        tracing::error!(
                            key = %job.key,
                            attempts = scheduler.config.max_attempts,
                            error = %err,
                            "Recovery abandoned"
                        );
                    }
                }
            }
        });
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> RecoveryStats {
        RecoveryStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
        }
    }

    /// Number of keys with a job pending or running.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fast_config() -> RecoveryConfig {
        RecoveryConfig {
            max_concurrent: 2,
            min_spacing: Duration::from_millis(5),
            max_attempts: 3,
            retry_delay: Duration::from_millis(10),
        }
    }

    struct CountingHandler {
        calls: Mutex<Vec<String>>,
        running: AtomicUsize,
        max_running: AtomicUsize,
        hold: Duration,
        fail_first: AtomicUsize,
    }

    impl CountingHandler {
        fn new(hold: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
                hold,
                fail_first: AtomicUsize::new(0),
            })
        }

        fn failing_first(hold: Duration, failures: usize) -> Arc<Self> {
            let handler = Self::new(hold);
            handler.fail_first.store(failures, Ordering::SeqCst);
            handler
        }
    }

    #[async_trait]
    impl RecoveryHandler for CountingHandler {
        async fn recover(&self, key: &str) -> Result<(), ProviderError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.hold).await;
            self.calls.lock().push(key.to_string());
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(ProviderError::Timeout);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn single_submit_runs_one_job() {
        let scheduler = RecoveryScheduler::new(fast_config());
        let handler = CountingHandler::new(Duration::ZERO);
        let cancel = CancellationToken::new();
        scheduler.run(Arc::clone(&handler) as Arc<dyn RecoveryHandler>, cancel.clone());

        assert!(scheduler.submit("BTC-USD"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(handler.calls.lock().as_slice(), ["BTC-USD"]);
        assert_eq!(scheduler.stats().completed, 1);
        assert_eq!(scheduler.pending_count(), 0);
        cancel.cancel();
    }

    #[tokio::test]
    async fn duplicate_submissions_coalesce() {
        let scheduler = RecoveryScheduler::new(RecoveryConfig {
            min_spacing: Duration::from_millis(50),
            ..fast_config()
        });
        let handler = CountingHandler::new(Duration::from_millis(20));
        let cancel = CancellationToken::new();
        scheduler.run(Arc::clone(&handler) as Arc<dyn RecoveryHandler>, cancel.clone());

        assert!(scheduler.submit("BTC-USD"));
        assert!(!scheduler.submit("BTC-USD"));
        assert!(!scheduler.submit("BTC-USD"));

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(handler.calls.lock().len(), 1);
        let stats = scheduler.stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.coalesced, 2);
        cancel.cancel();
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let scheduler = RecoveryScheduler::new(RecoveryConfig {
            max_concurrent: 2,
            min_spacing: Duration::from_millis(1),
            ..fast_config()
        });
        let handler = CountingHandler::new(Duration::from_millis(30));
        let cancel = CancellationToken::new();
        scheduler.run(Arc::clone(&handler) as Arc<dyn RecoveryHandler>, cancel.clone());

        for key in ["A", "B", "C", "D", "E"] {
            scheduler.submit(key);
        }

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(handler.calls.lock().len(), 5);
        assert!(handler.max_running.load(Ordering::SeqCst) <= 2);
        cancel.cancel();
    }

    #[tokio::test]
    async fn failed_job_is_retried_then_completes() {
        let scheduler = RecoveryScheduler::new(fast_config());
        let handler = CountingHandler::failing_first(Duration::ZERO, 1);
        let cancel = CancellationToken::new();
        scheduler.run(Arc::clone(&handler) as Arc<dyn RecoveryHandler>, cancel.clone());

        scheduler.submit("BTC-USD");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stats = scheduler.stats();
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(scheduler.pending_count(), 0);
        cancel.cancel();
    }

    #[tokio::test]
    async fn job_abandoned_after_max_attempts() {
        let scheduler = RecoveryScheduler::new(RecoveryConfig {
            max_attempts: 2,
            retry_delay: Duration::from_millis(5),
            ..fast_config()
        });
        let handler = CountingHandler::failing_first(Duration::ZERO, 10);
        let cancel = CancellationToken::new();
        scheduler.run(Arc::clone(&handler) as Arc<dyn RecoveryHandler>, cancel.clone());

        scheduler.submit("BTC-USD");
        tokio::time::sleep(Duration::from_millis(150)).await;

        let stats = scheduler.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 0);
        // Once abandoned, the key may be submitted again.
        assert_eq!(scheduler.pending_count(), 0);
        assert!(scheduler.submit("BTC-USD"));
        cancel.cancel();
    }
}

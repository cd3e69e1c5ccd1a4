//! Per-Key Sequence Tracking
//!
//! The push feed promises a strictly `+1` sequence per key. Any other
//! transition — a skip, a duplicate, or a regression — is a gap and must
//! trigger recovery; the contract only guarantees monotonic increase, so a
//! non-increasing sequence is never silently ignored.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::market::RequestKey;

// =============================================================================
// Outcomes
// =============================================================================

/// Result of observing one sequence number for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// First observation for this key; establishes the baseline.
    Start,
    /// Exactly `last + 1`.
    InOrder,
    /// Any non-`+1` transition.
    Gap {
        /// The sequence the tracker expected (`last + 1`).
        expected: u64,
        /// The sequence actually observed.
        observed: u64,
    },
}

impl SequenceOutcome {
    /// Whether this observation requires recovery.
    #[must_use]
    pub const fn is_gap(&self) -> bool {
        matches!(self, Self::Gap { .. })
    }
}

/// Read-only gap diagnostics for operational monitoring.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GapStats {
    /// Total gaps observed since startup.
    pub total_gaps_detected: u64,
    /// Recovery jobs actually scheduled for those gaps.
    pub recovery_triggered: u64,
    /// When the most recent gap was observed.
    pub last_gap_time: Option<DateTime<Utc>>,
}

// =============================================================================
// Tracker
// =============================================================================

/// Tracks the last sequence number seen per key and classifies transitions.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    last_sequence: HashMap<RequestKey, u64>,
    total_gaps: u64,
    last_gap_time: Option<DateTime<Utc>>,
}

impl SequenceTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe a sequence number for a key and classify the transition.
    ///
    /// The observed sequence becomes the new baseline regardless of outcome,
    /// so a single skip reports exactly one gap.
    pub fn observe(&mut self, key: &str, sequence: u64) -> SequenceOutcome {
        let outcome = match self.last_sequence.get(key) {
            None => SequenceOutcome::Start,
            Some(&last) if sequence == last + 1 => SequenceOutcome::InOrder,
            Some(&last) => SequenceOutcome::Gap {
                expected: last + 1,
                observed: sequence,
            },
        };

        if outcome.is_gap() {
            self.total_gaps += 1;
            self.last_gap_time = Some(Utc::now());
            if let SequenceOutcome::Gap { expected, observed } = outcome {
                tracing::warn!(key = %key, expected, observed, "Sequence gap detected");
            }
        }

        self.last_sequence.insert(key.to_string(), sequence);
        outcome
    }

    /// Reset the baseline for a key after an authoritative snapshot refresh.
    ///
    /// The next observation for the key starts a new run rather than being
    /// compared against the pre-recovery sequence.
    pub fn reset(&mut self, key: &str) {
        self.last_sequence.remove(key);
    }

    /// Drop tracking state for a key entirely.
    pub fn forget(&mut self, key: &str) {
        self.last_sequence.remove(key);
    }

    /// Last sequence recorded for a key, if any.
    #[must_use]
    pub fn last_sequence(&self, key: &str) -> Option<u64> {
        self.last_sequence.get(key).copied()
    }

    /// Total gaps observed since startup.
    #[must_use]
    pub const fn total_gaps(&self) -> u64 {
        self.total_gaps
    }

    /// Timestamp of the most recent gap.
    #[must_use]
    pub const fn last_gap_time(&self) -> Option<DateTime<Utc>> {
        self.last_gap_time
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.last_sequence.len()
    }
}

// =============================================================================
// Tests
// =============================================================================

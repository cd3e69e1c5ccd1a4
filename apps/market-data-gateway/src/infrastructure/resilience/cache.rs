//! Last-Known-Good Cache
//!
//! Short-TTL store of the most recent validated response per composite
//! request key. Entries are written only after a payload passes validation
//! and are evicted on read once stale. This is the third fallback tier:
//! consulted only after both live paths have failed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::domain::market::{DataSource, QualityVerdict};

// =============================================================================
// Entry
// =============================================================================

/// One cached response, tagged with the verdict and tier that produced it.
#[derive(Debug, Clone)]
pub struct CachedEntry<T> {
    /// The validated payload.
    pub data: T,
    /// Verdict the payload was stored with.
    pub quality: QualityVerdict,
    /// Tier that originally produced the payload.
    pub source: DataSource,
    /// When the entry was written.
    pub cached_at: Instant,
}

// =============================================================================
// Cache
// =============================================================================

/// TTL cache of the freshest valid response per composite key.
pub struct LastGoodCache<T> {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedEntry<T>>>,
}

impl<T: Clone> LastGoodCache<T> {
    /// Create a cache with the given entry TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Store a validated payload, replacing any previous entry for the key.
    pub fn put(&self, key: &str, data: T, quality: QualityVerdict, source: DataSource) {
        let entry = CachedEntry {
            data,
            quality,
            source,
            cached_at: Instant::now(),
        };
        self.entries.lock().insert(key.to_string(), entry);
    }

    /// Fetch a non-expired entry; an expired entry is evicted on read.
    pub fn get(&self, key: &str) -> Option<CachedEntry<T>> {
        let mut entries = self.entries.lock();

        match entries.get(key) {
            Some(entry) if entry.cached_at.elapsed() < self.ttl => Some(entry.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Number of entries currently stored (including not-yet-evicted stale ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Configured TTL.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl_ms: u64) -> LastGoodCache<u32> {
        LastGoodCache::new(Duration::from_millis(ttl_ms))
    }

    #[test]
    fn fresh_entry_is_returned() {
        let cache = cache(1_000);
        cache.put("quote:BTC-USD", 42, QualityVerdict::valid(), DataSource::Primary);

        let entry = cache.get("quote:BTC-USD").unwrap();
        assert_eq!(entry.data, 42);
        assert_eq!(entry.source, DataSource::Primary);
        assert!(entry.quality.is_valid);
    }

    #[test]
    fn missing_key_is_none() {
        assert!(cache(1_000).get("quote:ETH-USD").is_none());
    }

    #[test]
    fn stale_entry_is_evicted_on_read() {
        let cache = cache(10);
        cache.put("quote:BTC-USD", 42, QualityVerdict::valid(), DataSource::Primary);

        std::thread::sleep(Duration::from_millis(20));

        assert!(cache.get("quote:BTC-USD").is_none());
        // The read itself removed the entry.
        assert!(cache.is_empty());
    }

    #[test]
    fn put_replaces_previous_entry() {
        let cache = cache(1_000);
        cache.put("quote:BTC-USD", 1, QualityVerdict::valid(), DataSource::Primary);
        cache.put("quote:BTC-USD", 2, QualityVerdict::valid(), DataSource::Secondary);

        let entry = cache.get("quote:BTC-USD").unwrap();
        assert_eq!(entry.data, 2);
        assert_eq!(entry.source, DataSource::Secondary);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache = cache(1_000);
        cache.put("a", 1, QualityVerdict::valid(), DataSource::Primary);
        cache.put("b", 2, QualityVerdict::valid(), DataSource::Primary);

        cache.clear();
        assert!(cache.is_empty());
    }
}

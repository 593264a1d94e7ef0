//! Cache statistics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Current number of entries, expired ones included until swept
    pub size: usize,

    /// Configured entry limit
    pub max_size: usize,

    /// Entries past their expiry that have not been removed yet
    pub expired_count: usize,

    /// Entries that would be served on read
    pub valid_count: usize,

    /// Total number of get requests
    pub total_gets: u64,

    /// Number of cache hits
    pub hits: u64,

    /// Number of cache misses
    pub misses: u64,

    /// Total number of put requests
    pub total_puts: u64,

    /// Entries evicted under capacity pressure
    pub evictions: u64,

    /// Entries removed because they expired
    pub expirations: u64,

    /// Entries removed by invalidation
    pub invalidations: u64,

    /// Writes dropped because an invalidation happened after the read began
    pub stale_writes: u64,

    /// Hit rate (0.0 to 1.0)
    pub hit_rate: f64,
}

/// Point-in-time entry counts taken under the cache lock
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryCounts {
    pub size: usize,
    pub max_size: usize,
    pub expired: usize,
}

/// Thread-safe statistics collector
#[derive(Debug, Default)]
pub struct StatsCollector {
    total_gets: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    total_puts: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
    stale_writes: AtomicU64,
}

impl StatsCollector {
    /// Create a new stats collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cache hit
    pub fn record_hit(&self) {
        self.total_gets.fetch_add(1, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache miss
    pub fn record_miss(&self) {
        self.total_gets.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a put operation
    pub fn record_put(&self) {
        self.total_puts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an eviction
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expirations(&self, count: usize) {
        self.expirations.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_invalidations(&self, count: usize) {
        self.invalidations.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_stale_write(&self) {
        self.stale_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset hit/miss counters without touching entries
    pub fn reset(&self) {
        for counter in [
            &self.total_gets,
            &self.hits,
            &self.misses,
            &self.total_puts,
            &self.evictions,
            &self.expirations,
            &self.invalidations,
            &self.stale_writes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Get current stats
    pub fn get_stats(&self, counts: EntryCounts) -> CacheStats {
        let total_gets = self.total_gets.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);

        let hit_rate = if total_gets > 0 {
            hits as f64 / total_gets as f64
        } else {
            0.0
        };

        CacheStats {
            size: counts.size,
            max_size: counts.max_size,
            expired_count: counts.expired,
            valid_count: counts.size.saturating_sub(counts.expired),
            total_gets,
            hits,
            misses: self.misses.load(Ordering::Relaxed),
            total_puts: self.total_puts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            stale_writes: self.stale_writes.load(Ordering::Relaxed),
            hit_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = StatsCollector::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();

        let snapshot = stats.get_stats(EntryCounts {
            size: 3,
            max_size: 10,
            expired: 1,
        });
        assert_eq!(snapshot.total_gets, 4);
        assert_eq!(snapshot.hit_rate, 0.75);
        assert_eq!(snapshot.valid_count, 2);

        stats.reset();
        assert_eq!(stats.get_stats(EntryCounts::default()).hit_rate, 0.0);
    }
}

//! Response cache keyed by call signature

use log::{debug, info};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::cache_control::CacheControl;
use crate::entry::CacheEntry;
use crate::errors::{CacheError, CacheResult};
use crate::pattern::{CacheStrategy, GlobPattern, StrategySet};
use crate::stats::{CacheStats, EntryCounts, StatsCollector};

/// Marker taken before a cacheable read starts.
///
/// A write made with a ticket is dropped if any invalidation happened after
/// the ticket was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadTicket(u64);

/// TTL + LRU cache for read responses
pub struct RequestCache<V> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    strategies: StrategySet,
    default_ttl: Duration,
    enabled: bool,
    respect_cache_control: bool,
    epoch: AtomicU64,
    stats: StatsCollector,
}

impl<V: Clone> RequestCache<V> {
    /// Create a cache holding at most `max_size` entries
    pub fn new(max_size: usize, default_ttl: Duration) -> CacheResult<Self> {
        let capacity = NonZeroUsize::new(max_size).ok_or_else(|| {
            CacheError::InvalidConfiguration("max_size must be greater than 0".to_string())
        })?;

        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            strategies: StrategySet::default(),
            default_ttl,
            enabled: true,
            respect_cache_control: true,
            epoch: AtomicU64::new(0),
            stats: StatsCollector::new(),
        })
    }

    /// Build from configuration
    pub fn from_config(config: &bastion_config::CacheConfig) -> CacheResult<Self> {
        let strategies = config
            .strategies
            .iter()
            .map(CacheStrategy::try_from)
            .collect::<CacheResult<Vec<_>>>()?;

        let mut cache = Self::new(config.max_size, config.default_ttl)?;
        cache.strategies = StrategySet::new(strategies);
        cache.enabled = config.enabled;
        cache.respect_cache_control = config.respect_cache_control;
        Ok(cache)
    }

    /// Replace the URL-pattern strategies
    pub fn with_strategies(mut self, strategies: Vec<CacheStrategy>) -> Self {
        self.strategies = StrategySet::new(strategies);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// TTL for a read of `url`, or `None` if it must not be cached
    pub fn ttl_for(&self, url: &str) -> Option<Duration> {
        if !self.enabled {
            return None;
        }

        let ttl = match self.strategies.resolve(url) {
            Some(strategy) if !strategy.enabled => return None,
            Some(strategy) => strategy.ttl.unwrap_or(self.default_ttl),
            None => self.default_ttl,
        };

        (!ttl.is_zero()).then_some(ttl)
    }

    /// TTL for a response to `url` carrying an optional `Cache-Control` header.
    ///
    /// The header can prevent caching or replace the TTL but never enables
    /// caching for a URL whose strategy disables it.
    pub fn ttl_for_response(&self, url: &str, cache_control: Option<&str>) -> Option<Duration> {
        let ttl = self.ttl_for(url)?;

        match cache_control {
            Some(header) if self.respect_cache_control => {
                let control = CacheControl::parse(header);
                if !control.is_cacheable() {
                    return None;
                }
                let ttl = control.get_ttl(ttl);
                (!ttl.is_zero()).then_some(ttl)
            }
            _ => Some(ttl),
        }
    }

    /// Cached value for `signature`. Expired entries are removed and miss.
    pub fn get(&self, signature: &str) -> Option<V> {
        let mut entries = self.entries.lock();

        let expired = match entries.peek(signature) {
            None => {
                self.stats.record_miss();
                return None;
            }
            Some(entry) => entry.is_expired(),
        };

        if expired {
            entries.pop(signature);
            self.stats.record_expirations(1);
            self.stats.record_miss();
            debug!("Cache entry expired: {}", signature);
            return None;
        }

        let entry = entries.get_mut(signature)?;
        entry.touch();
        self.stats.record_hit();
        Some(entry.value.clone())
    }

    /// Store `value` for `ttl`. A zero TTL stores nothing.
    pub fn set(&self, signature: impl Into<String>, value: V, ttl: Duration) {
        self.insert(signature.into(), value, ttl, None, None);
    }

    /// Store `value` along with the response validator
    pub fn set_with_etag(
        &self,
        signature: impl Into<String>,
        value: V,
        ttl: Duration,
        etag: Option<String>,
    ) {
        self.insert(signature.into(), value, ttl, etag, None);
    }

    /// Take a ticket before starting the read that will produce a cached value
    pub fn begin_read(&self) -> ReadTicket {
        ReadTicket(self.epoch.load(Ordering::SeqCst))
    }

    /// Store `value` unless an invalidation happened since `ticket` was taken.
    /// Returns whether the value was stored.
    pub fn set_if_current(
        &self,
        ticket: ReadTicket,
        signature: impl Into<String>,
        value: V,
        ttl: Duration,
        etag: Option<String>,
    ) -> bool {
        self.insert(signature.into(), value, ttl, etag, Some(ticket))
    }

    fn insert(
        &self,
        signature: String,
        value: V,
        ttl: Duration,
        etag: Option<String>,
        ticket: Option<ReadTicket>,
    ) -> bool {
        if ttl.is_zero() {
            return false;
        }

        let mut entries = self.entries.lock();

        if let Some(ReadTicket(epoch)) = ticket {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                self.stats.record_stale_write();
                debug!("Dropping cache write for {} after invalidation", signature);
                return false;
            }
        }

        let Some(entry) = CacheEntry::new(value, ttl, etag) else {
            debug!("TTL {:?} out of range, not caching {}", ttl, signature);
            return false;
        };
        self.stats.record_put();

        if let Some((evicted, _)) = entries.push(signature.clone(), entry) {
            if evicted != signature {
                self.stats.record_eviction();
                debug!("Evicted least recently used cache entry: {}", evicted);
            }
        }
        true
    }

    /// Remove entries whose signature matches the glob `pattern`, or every
    /// entry if no pattern is given. Returns the number removed.
    pub fn invalidate(&self, pattern: Option<&str>) -> CacheResult<usize> {
        let removed = match pattern {
            None => {
                let mut entries = self.entries.lock();
                let removed = entries.len();
                entries.clear();
                self.epoch.fetch_add(1, Ordering::SeqCst);
                removed
            }
            Some(pattern) => {
                let glob = GlobPattern::new(pattern)?;
                self.invalidate_where(|signature| glob.matches(signature))
            }
        };

        self.stats.record_invalidations(removed);
        info!(
            "Invalidated {} cache entr{} ({})",
            removed,
            if removed == 1 { "y" } else { "ies" },
            pattern.unwrap_or("all")
        );
        Ok(removed)
    }

    /// Remove entries whose signature satisfies `predicate`
    pub fn invalidate_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&str) -> bool,
    {
        let mut entries = self.entries.lock();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(signature, _)| predicate(signature))
            .map(|(signature, _)| signature.clone())
            .collect();

        for signature in &doomed {
            entries.pop(signature);
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        doomed.len()
    }

    /// ETag of a live entry
    pub fn etag(&self, signature: &str) -> Option<String> {
        let entries = self.entries.lock();
        entries
            .peek(signature)
            .filter(|entry| !entry.is_expired())
            .and_then(|entry| entry.etag.clone())
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(signature, _)| signature.clone())
            .collect();

        for signature in &expired {
            entries.pop(signature);
        }
        self.stats.record_expirations(expired.len());
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries.lock();
        let counts = EntryCounts {
            size: entries.len(),
            max_size: entries.cap().get(),
            expired: entries
                .iter()
                .filter(|(_, entry)| entry.is_expired_at(now))
                .count(),
        };
        drop(entries);

        self.stats.get_stats(counts)
    }

    /// Reset hit/miss counters
    pub fn reset_stats(&self) {
        self.stats.reset();
    }
}

//! Cache entry with metadata

use std::time::{Duration, Instant};

/// Cache entry with metadata
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached value
    pub value: V,

    /// When the entry was created
    pub created_at: Instant,

    /// When the entry expires
    pub expires_at: Instant,

    /// Validator captured from the response
    pub etag: Option<String>,

    /// Number of times read
    pub access_count: u64,

    /// Last read time
    pub last_accessed: Instant,
}

impl<V> CacheEntry<V> {
    /// Returns `None` if `ttl` is too large to represent as an expiry instant
    pub fn new(value: V, ttl: Duration, etag: Option<String>) -> Option<Self> {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl)?;
        Some(Self {
            value,
            created_at: now,
            expires_at,
            etag,
            access_count: 0,
            last_accessed: now,
        })
    }

    /// Entry is expired once `now` is past `expires_at`
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    /// Mark as read
    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed = Instant::now();
    }

    /// Remaining lifetime
    pub fn ttl_remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

//! Per-request options

use bastion_resilience::RetryPolicy;
use std::collections::BTreeMap;
use std::time::Duration;

/// Overrides applied to a single call
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra headers, replacing defaults with the same name
    pub headers: BTreeMap<String, String>,
    /// Per-attempt deadline instead of the client timeout
    pub timeout: Option<Duration>,
    /// Send without credentials and without 401 handling
    pub skip_auth: bool,
    /// Neither read nor write the response cache
    pub skip_cache: bool,
    /// Do not coalesce with identical in-flight calls
    pub skip_dedup: bool,
    /// TTL for this response instead of the resolved strategy TTL
    pub cache_ttl: Option<Duration>,
    /// Retry policy for this call only
    pub retry: Option<RetryPolicy>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    pub fn skip_dedup(mut self) -> Self {
        self.skip_dedup = true;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }
}

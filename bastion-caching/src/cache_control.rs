//! `Cache-Control` response header parsing

use std::time::Duration;

/// Largest `max-age` honoured; larger values are clamped (RFC 9111 §1.2.2)
pub const MAX_DELTA_SECONDS: u64 = 1 << 31;

/// Cache control directives
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CacheControl {
    pub no_cache: bool,
    pub no_store: bool,
    pub max_age: Option<Duration>,
    pub s_maxage: Option<Duration>,
    pub private: bool,
    pub public: bool,
}

impl CacheControl {
    /// Parse a cache control header
    pub fn parse(header: &str) -> Self {
        let mut control = CacheControl::default();

        for directive in header.split(',') {
            let directive = directive.trim().to_ascii_lowercase();

            if directive == "no-cache" {
                control.no_cache = true;
            } else if directive == "no-store" {
                control.no_store = true;
            } else if let Some(max_age) = directive.strip_prefix("max-age=") {
                control.max_age = parse_delta_seconds(max_age).or(control.max_age);
            } else if let Some(s_maxage) = directive.strip_prefix("s-maxage=") {
                control.s_maxage = parse_delta_seconds(s_maxage).or(control.s_maxage);
            } else if directive == "private" {
                control.private = true;
            } else if directive == "public" {
                control.public = true;
            }
        }

        control
    }

    /// Check if response is cacheable
    pub fn is_cacheable(&self) -> bool {
        !self.no_store && !self.no_cache
    }

    /// Get effective TTL
    pub fn get_ttl(&self, default: Duration) -> Duration {
        self.s_maxage.or(self.max_age).unwrap_or(default)
    }
}

/// Digits that overflow are treated as the maximum
fn parse_delta_seconds(value: &str) -> Option<Duration> {
    let digits = value.trim_matches('"');
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let seconds = digits.parse::<u64>().unwrap_or(MAX_DELTA_SECONDS);
    Some(Duration::from_secs(seconds.min(MAX_DELTA_SECONDS)))
}

//! Response cache configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether read responses are cached
    #[serde(default = "crate::domains::utils::default_true")]
    pub enabled: bool,

    /// Maximum number of cached entries
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// TTL used when no strategy matches
    #[serde(
        rename = "default_ttl_ms",
        with = "crate::domains::utils::serde_duration_ms",
        default = "default_ttl"
    )]
    pub default_ttl: Duration,

    /// Whether `Cache-Control` response headers shorten or prevent caching
    #[serde(default = "crate::domains::utils::default_true")]
    pub respect_cache_control: bool,

    /// Whether successful writes invalidate cached reads of the same URL
    #[serde(default = "crate::domains::utils::default_true")]
    pub invalidate_on_mutation: bool,

    /// URL-pattern specific TTL overrides
    #[serde(default)]
    pub strategies: Vec<CacheStrategyConfig>,
}

/// TTL override for URLs matching a glob pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStrategyConfig {
    /// Glob pattern (`*` wildcard) matched against the request URL
    pub pattern: String,

    /// TTL for matching URLs; zero bypasses the cache
    #[serde(
        rename = "ttl_ms",
        default,
        with = "crate::domains::utils::serde_duration_ms_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub ttl: Option<Duration>,

    /// Set to false to disable caching for matching URLs
    #[serde(default = "crate::domains::utils::default_true")]
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: default_max_size(),
            default_ttl: default_ttl(),
            respect_cache_control: true,
            invalidate_on_mutation: true,
            strategies: Vec::new(),
        }
    }
}

impl Validatable for CacheConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.max_size, "max_size", self.domain_name())?;

        for strategy in &self.strategies {
            validate_required_string(&strategy.pattern, "strategies.pattern", self.domain_name())?;
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "cache"
    }
}

fn default_max_size() -> usize {
    100
}

fn default_ttl() -> Duration {
    Duration::from_secs(300)
}

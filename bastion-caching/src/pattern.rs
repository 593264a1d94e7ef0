//! Glob patterns and URL-pattern TTL strategies

use regex::Regex;
use std::time::Duration;

use crate::errors::{CacheError, CacheResult};

/// Glob pattern where `*` matches any run of characters
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    /// Compile a glob pattern. All characters except `*` match literally.
    pub fn new(pattern: &str) -> CacheResult<Self> {
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");

        let regex = Regex::new(&format!("^{}$", body)).map_err(|source| {
            CacheError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    /// Number of literal characters; more literals means more specific
    pub fn specificity(&self) -> usize {
        self.source.chars().filter(|c| *c != '*').count()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// TTL override for URLs matching a pattern
#[derive(Debug, Clone)]
pub struct CacheStrategy {
    pub pattern: GlobPattern,
    /// `None` falls back to the default TTL, zero bypasses the cache
    pub ttl: Option<Duration>,
    pub enabled: bool,
}

impl CacheStrategy {
    pub fn new(pattern: &str, ttl: Option<Duration>) -> CacheResult<Self> {
        Ok(Self {
            pattern: GlobPattern::new(pattern)?,
            ttl,
            enabled: true,
        })
    }

    /// Strategy that turns caching off for matching URLs
    pub fn disabled(pattern: &str) -> CacheResult<Self> {
        Ok(Self {
            pattern: GlobPattern::new(pattern)?,
            ttl: None,
            enabled: false,
        })
    }
}

impl TryFrom<&bastion_config::CacheStrategyConfig> for CacheStrategy {
    type Error = CacheError;

    fn try_from(config: &bastion_config::CacheStrategyConfig) -> CacheResult<Self> {
        Ok(Self {
            pattern: GlobPattern::new(&config.pattern)?,
            ttl: config.ttl,
            enabled: config.enabled,
        })
    }
}

/// Strategies ordered from most to least specific
#[derive(Debug, Clone, Default)]
pub struct StrategySet {
    strategies: Vec<CacheStrategy>,
}

impl StrategySet {
    pub fn new(mut strategies: Vec<CacheStrategy>) -> Self {
        // Stable sort keeps declaration order among equally specific patterns
        strategies.sort_by(|a, b| b.pattern.specificity().cmp(&a.pattern.specificity()));
        Self { strategies }
    }

    /// Most specific strategy matching `url`
    pub fn resolve(&self, url: &str) -> Option<&CacheStrategy> {
        self.strategies.iter().find(|strategy| strategy.pattern.matches(url))
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

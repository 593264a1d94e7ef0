//! Domain-specific configuration modules

pub mod auth;
pub mod cache;
pub mod circuit_breaker;
pub mod client;
pub mod dedup;
pub mod health;
pub mod logging;
pub mod retry;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Complete client configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BastionConfig {
    /// HTTP client configuration
    #[serde(default)]
    pub client: client::ClientConfig,

    /// Authentication and token storage configuration
    #[serde(default)]
    pub auth: auth::AuthConfig,

    /// Retry policy configuration
    #[serde(default)]
    pub retry: retry::RetryConfig,

    /// Circuit breaker configuration
    #[serde(default)]
    pub circuit_breaker: circuit_breaker::CircuitBreakerConfig,

    /// Response cache configuration
    #[serde(default)]
    pub cache: cache::CacheConfig,

    /// Request deduplication configuration
    #[serde(default)]
    pub dedup: dedup::DedupConfig,

    /// Health monitor configuration
    #[serde(default)]
    pub health: health::HealthConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl BastionConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.client.validate()?;
        self.auth.validate()?;
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        self.cache.validate()?;
        self.dedup.validate()?;
        self.health.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = BastionConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(BastionConfig::default().validate_all().is_ok());
    }

    #[test]
    fn test_sample_round_trips() {
        let sample = BastionConfig::generate_sample();
        let parsed: BastionConfig = serde_yaml::from_str(&sample).unwrap();
        assert!(parsed.validate_all().is_ok());
        assert_eq!(parsed.retry.attempts, 3);
    }
}

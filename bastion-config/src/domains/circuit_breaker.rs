//! Circuit breaker configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Whether the breaker gates outgoing calls
    #[serde(default = "crate::domains::utils::default_true")]
    pub enabled: bool,

    /// Failures within the monitoring period that open the circuit
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// Requests that must be observed before the circuit may open
    #[serde(default = "default_minimum_requests")]
    pub minimum_requests: u32,

    /// Rolling window for failure counting
    #[serde(
        rename = "monitoring_period_ms",
        with = "crate::domains::utils::serde_duration_ms",
        default = "default_monitoring_period"
    )]
    pub monitoring_period: Duration,

    /// Time spent open before a probe is allowed
    #[serde(
        rename = "reset_timeout_ms",
        with = "crate::domains::utils::serde_duration_ms",
        default = "default_reset_timeout"
    )]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_threshold(),
            minimum_requests: default_minimum_requests(),
            monitoring_period: default_monitoring_period(),
            reset_timeout: default_reset_timeout(),
        }
    }
}

impl Validatable for CircuitBreakerConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.threshold, "threshold", self.domain_name())?;
        validate_positive(
            self.monitoring_period.as_millis(),
            "monitoring_period_ms",
            self.domain_name(),
        )?;
        validate_positive(
            self.reset_timeout.as_millis(),
            "reset_timeout_ms",
            self.domain_name(),
        )?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "circuit_breaker"
    }
}

fn default_threshold() -> u32 {
    5
}

fn default_minimum_requests() -> u32 {
    10
}

fn default_monitoring_period() -> Duration {
    Duration::from_secs(60)
}

fn default_reset_timeout() -> Duration {
    Duration::from_secs(30)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_defaults() {
        let config = CircuitBreakerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.threshold, 5);
        assert_eq!(config.minimum_requests, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let config = CircuitBreakerConfig {
            threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

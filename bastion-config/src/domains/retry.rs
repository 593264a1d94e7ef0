//! Retry policy configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_range, Validatable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per logical call, including the first one
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Delay growth strategy
    #[serde(default)]
    pub strategy: RetryStrategyKind,

    /// Base delay between attempts
    #[serde(
        rename = "delay_ms",
        with = "crate::domains::utils::serde_duration_ms",
        default = "default_delay"
    )]
    pub delay: Duration,

    /// Upper bound applied to every computed delay
    #[serde(
        rename = "max_delay_ms",
        with = "crate::domains::utils::serde_duration_ms",
        default = "default_max_delay"
    )]
    pub max_delay: Duration,

    /// Fraction of the exponential delay added as random jitter
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,

    /// Failure kinds that are retried
    #[serde(default = "default_conditions")]
    pub conditions: Vec<RetryConditionKind>,
}

/// Delay growth strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryStrategyKind {
    Fixed,
    Exponential,
    #[default]
    ExponentialJitter,
}

/// Failure kinds a retry may be attempted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetryConditionKind {
    #[serde(rename = "network")]
    Network,
    #[serde(rename = "5xx")]
    ServerError,
    #[serde(rename = "timeout")]
    Timeout,
    /// Only takes effect when retries run outside a circuit breaker. The
    /// HTTP client checks the breaker before retrying, so an open circuit
    /// there fails the call without another attempt.
    #[serde(rename = "circuit-open")]
    CircuitOpen,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            strategy: RetryStrategyKind::default(),
            delay: default_delay(),
            max_delay: default_max_delay(),
            jitter_factor: default_jitter_factor(),
            conditions: default_conditions(),
        }
    }
}

impl fmt::Display for RetryStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryStrategyKind::Fixed => write!(f, "fixed"),
            RetryStrategyKind::Exponential => write!(f, "exponential"),
            RetryStrategyKind::ExponentialJitter => write!(f, "exponential-jitter"),
        }
    }
}

impl FromStr for RetryStrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "fixed" => Ok(RetryStrategyKind::Fixed),
            "exponential" => Ok(RetryStrategyKind::Exponential),
            "exponential-jitter" => Ok(RetryStrategyKind::ExponentialJitter),
            _ => Err(format!("Invalid retry strategy: {}", s)),
        }
    }
}

impl Validatable for RetryConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.attempts, "attempts", self.domain_name())?;
        validate_range(self.jitter_factor, 0.0, 1.0, "jitter_factor", self.domain_name())?;

        if self.max_delay < self.delay {
            return Err(self.validation_error(format!(
                "max_delay_ms ({}) must not be smaller than delay_ms ({})",
                self.max_delay.as_millis(),
                self.delay.as_millis()
            )));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "retry"
    }
}

// Default value functions
fn default_attempts() -> u32 {
    3
}

fn default_delay() -> Duration {
    Duration::from_millis(1000)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_jitter_factor() -> f64 {
    0.1
}

fn default_conditions() -> Vec<RetryConditionKind> {
    vec![
        RetryConditionKind::Network,
        RetryConditionKind::ServerError,
        RetryConditionKind::Timeout,
    ]
}

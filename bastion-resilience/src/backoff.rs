//! Backoff strategies for retry policies

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,

    /// Exponential increase: delay = initial_delay * base^(attempt-1)
    Exponential {
        /// Base for exponential calculation (e.g., 2.0 for doubling)
        base: f64,
    },

    /// Exponential delay plus `exponential * jitter_factor * U(0,1)`
    ExponentialJitter {
        /// Base for exponential calculation
        base: f64,
        /// Fraction of the exponential delay added as random jitter
        jitter_factor: f64,
    },
}

impl From<&bastion_config::RetryConfig> for BackoffStrategy {
    fn from(config: &bastion_config::RetryConfig) -> Self {
        use bastion_config::RetryStrategyKind;

        match config.strategy {
            RetryStrategyKind::Fixed => BackoffStrategy::Fixed,
            RetryStrategyKind::Exponential => BackoffStrategy::Exponential { base: 2.0 },
            RetryStrategyKind::ExponentialJitter => BackoffStrategy::ExponentialJitter {
                base: 2.0,
                jitter_factor: config.jitter_factor,
            },
        }
    }
}

/// Backoff delay calculator
pub struct BackoffCalculator {
    strategy: BackoffStrategy,
    initial_delay: Duration,
    max_delay: Duration,
}

impl BackoffCalculator {
    /// Create a new backoff calculator
    pub fn new(strategy: BackoffStrategy, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            strategy,
            initial_delay,
            max_delay,
        }
    }

    /// Calculate delay for a specific attempt (1-indexed), capped at the max delay
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay = match &self.strategy {
            BackoffStrategy::Fixed => self.initial_delay,

            BackoffStrategy::Exponential { base } => self.exponential(*base, attempt),

            BackoffStrategy::ExponentialJitter {
                base,
                jitter_factor,
            } => {
                let exponential = self.exponential(*base, attempt);
                let unit: f64 = rand::thread_rng().gen_range(0.0..1.0);
                exponential + exponential.mul_f64(jitter_factor * unit)
            }
        };

        delay.min(self.max_delay)
    }

    fn exponential(&self, base: f64, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = base.powi(attempt as i32 - 1);
        let nanos = self.initial_delay.as_nanos() as f64 * multiplier;
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos as u64)
    }
}

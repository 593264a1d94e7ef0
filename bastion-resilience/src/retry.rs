//! Retry policy and executor

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::backoff::{BackoffCalculator, BackoffStrategy};
use crate::failure::{FailureKind, Retryable};

/// Failure kinds a policy may retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryCondition {
    Network,
    ServerError,
    Timeout,
    CircuitOpen,
}

impl RetryCondition {
    /// Whether this condition covers the given failure kind
    pub fn matches(&self, kind: FailureKind) -> bool {
        matches!(
            (self, kind),
            (RetryCondition::Network, FailureKind::Network)
                | (RetryCondition::ServerError, FailureKind::Server)
                | (RetryCondition::Timeout, FailureKind::Timeout)
                | (RetryCondition::CircuitOpen, FailureKind::CircuitOpen)
        )
    }
}

impl From<bastion_config::RetryConditionKind> for RetryCondition {
    fn from(kind: bastion_config::RetryConditionKind) -> Self {
        use bastion_config::RetryConditionKind;

        match kind {
            RetryConditionKind::Network => RetryCondition::Network,
            RetryConditionKind::ServerError => RetryCondition::ServerError,
            RetryConditionKind::Timeout => RetryCondition::Timeout,
            RetryConditionKind::CircuitOpen => RetryCondition::CircuitOpen,
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one, at least 1
    pub max_attempts: u32,

    /// Base delay between attempts
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Backoff strategy
    pub backoff_strategy: BackoffStrategy,

    /// Failure kinds that are retried
    pub conditions: Vec<RetryCondition>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_strategy: BackoffStrategy::ExponentialJitter {
                base: 2.0,
                jitter_factor: 0.1,
            },
            conditions: vec![
                RetryCondition::Network,
                RetryCondition::ServerError,
                RetryCondition::Timeout,
            ],
        }
    }
}

impl From<&bastion_config::RetryConfig> for RetryPolicy {
    fn from(config: &bastion_config::RetryConfig) -> Self {
        Self {
            max_attempts: config.attempts.max(1),
            initial_delay: config.delay,
            max_delay: config.max_delay,
            backoff_strategy: BackoffStrategy::from(config),
            conditions: config.conditions.iter().copied().map(Into::into).collect(),
        }
    }
}

impl RetryPolicy {
    /// Fixed-delay policy retrying the default conditions
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_strategy: BackoffStrategy::Fixed,
            ..Self::default()
        }
    }

    /// Policy that makes a single attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Replace the retried conditions
    pub fn with_conditions(mut self, conditions: Vec<RetryCondition>) -> Self {
        self.conditions = conditions;
        self
    }

    /// Calculate delay after a failed attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let calculator = BackoffCalculator::new(
            self.backoff_strategy.clone(),
            self.initial_delay,
            self.max_delay,
        );

        calculator.calculate_delay(attempt)
    }

    /// Whether a failure of this kind is retried under this policy.
    ///
    /// Auth and other client errors are never retried.
    pub fn should_retry(&self, kind: FailureKind) -> bool {
        if kind.is_never_retried() {
            return false;
        }
        self.conditions.iter().any(|condition| condition.matches(kind))
    }
}

/// One entry in the attempt log of a logical call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 1-indexed attempt number
    pub attempt: u32,

    /// Delay waited after this attempt before the next one
    #[serde(with = "humantime_serde")]
    pub delay: Duration,

    /// Failure message of this attempt
    pub error: Option<String>,
}

/// Retry executor
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create a new retry executor with the given policy
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Create with default policy
    pub fn with_default_policy() -> Self {
        Self::new(RetryPolicy::default())
    }

    /// Policy applied by `execute`
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute a function with retry logic
    pub async fn execute<F, Fut, T, E>(&self, mut f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        run(&self.policy, |_attempt| f()).await
    }

    /// Execute with a policy that overrides the executor's own
    pub async fn execute_with_policy<F, Fut, T, E>(
        &self,
        policy: &RetryPolicy,
        mut f: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        run(policy, |_attempt| f()).await
    }

    /// Execute a function with retry logic and attempt context
    pub async fn execute_with_context<F, Fut, T, E>(&self, f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        run(&self.policy, f).await
    }
}

async fn run<F, Fut, T, E>(policy: &RetryPolicy, mut f: F) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut log = Vec::new();
    let mut attempt = 1;

    loop {
        debug!("Executing attempt {} of {}", attempt, max_attempts);

        match f(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    info!("Operation succeeded after {} attempts", attempt);
                }
                return Ok(result);
            }
            Err(error) => {
                let kind = error.failure_kind();

                if !policy.should_retry(kind) {
                    log.push(RetryAttempt {
                        attempt,
                        delay: Duration::ZERO,
                        error: Some(error.to_string()),
                    });
                    debug!("Not retrying {} failure: {}", kind, error);
                    return Err(RetryError::NonRetryableError { log, error });
                }

                if attempt >= max_attempts {
                    log.push(RetryAttempt {
                        attempt,
                        delay: Duration::ZERO,
                        error: Some(error.to_string()),
                    });
                    warn!("Operation failed after {} attempts: {}", attempt, error);
                    return Err(RetryError::MaxAttemptsExceeded {
                        attempts: attempt,
                        log,
                        last_error: error,
                    });
                }

                let delay = error
                    .retry_delay()
                    .map(|delay| delay.min(policy.max_delay))
                    .unwrap_or_else(|| policy.delay_for_attempt(attempt));

                warn!(
                    "Attempt {} failed ({}): {}. Retrying in {:?}",
                    attempt, kind, error, delay
                );
                log.push(RetryAttempt {
                    attempt,
                    delay,
                    error: Some(error.to_string()),
                });

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Retry error types
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Maximum retry attempts exceeded
    #[error("Maximum retry attempts ({attempts}) exceeded. Last error: {last_error}")]
    MaxAttemptsExceeded {
        attempts: u32,
        log: Vec<RetryAttempt>,
        last_error: E,
    },

    /// Non-retryable error encountered
    #[error("Non-retryable error: {error}")]
    NonRetryableError { log: Vec<RetryAttempt>, error: E },
}

impl<E> RetryError<E> {
    /// Get the underlying error
    pub fn into_inner(self) -> E {
        match self {
            RetryError::MaxAttemptsExceeded { last_error, .. } => last_error,
            RetryError::NonRetryableError { error, .. } => error,
        }
    }

    /// Last failure observed
    pub fn last_error(&self) -> &E {
        match self {
            RetryError::MaxAttemptsExceeded { last_error, .. } => last_error,
            RetryError::NonRetryableError { error, .. } => error,
        }
    }

    /// Ordered log of every attempt made
    pub fn attempt_log(&self) -> &[RetryAttempt] {
        match self {
            RetryError::MaxAttemptsExceeded { log, .. } => log,
            RetryError::NonRetryableError { log, .. } => log,
        }
    }

    /// Split into the attempt log and the last error
    pub fn into_parts(self) -> (Vec<RetryAttempt>, E) {
        match self {
            RetryError::MaxAttemptsExceeded {
                log, last_error, ..
            } => (log, last_error),
            RetryError::NonRetryableError { log, error } => (log, error),
        }
    }

    /// Number of attempts made
    pub fn attempts(&self) -> u32 {
        self.attempt_log().len() as u32
    }
}

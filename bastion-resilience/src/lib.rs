//! Resilience patterns for bastion
//!
//! This crate provides the retry executor, circuit breaker and request
//! deduplicator that wrap every outgoing call, along with the failure
//! classification they share.

pub mod backoff;
pub mod circuit_breaker;
pub mod dedup;
pub mod failure;
pub mod retry;
pub mod singleflight;

// Re-export commonly used types
pub use backoff::{BackoffCalculator, BackoffStrategy};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerConfig, CircuitBreakerError,
    CircuitState, CircuitStats,
};
pub use dedup::{DedupStats, RequestDeduplicator};
pub use failure::{FailureKind, Retryable};
pub use retry::{RetryAttempt, RetryCondition, RetryError, RetryExecutor, RetryPolicy};
pub use singleflight::{spawn_shared, spawn_shared_abortable, OperationAborted, SharedOutcome};

//! Domain-driven configuration management for bastion
//!
//! Configuration is split by functional domain (client, auth, retry, circuit
//! breaker, cache, deduplication, health, logging). Each domain carries its
//! own defaults and validation, and the whole tree can be loaded from YAML
//! with `BASTION_*` environment overrides.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    auth::{AuthConfig, StorageKind, StorageOptions, TokenSource},
    cache::{CacheConfig, CacheStrategyConfig},
    circuit_breaker::CircuitBreakerConfig,
    client::ClientConfig,
    dedup::DedupConfig,
    health::HealthConfig,
    logging::{LogFormat, LogLevel, LoggingConfig},
    retry::{RetryConditionKind, RetryConfig, RetryStrategyKind},
    BastionConfig,
};

// Re-export utilities
pub use domains::utils::serde_duration_ms;

//! Authenticated, resilient HTTP client for bastion
//!
//! [`ResilientClient`] composes the token refresh coordinator, response
//! cache, request deduplicator, circuit breaker and retry executor around a
//! pluggable [`Transport`]. Enable the `testing` feature for
//! `MockTransport` and `MockTokenStore`.

pub mod auth;
pub mod client;
pub mod config;
pub mod errors;
pub mod health;
pub mod options;
pub mod signature;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use auth::{
    build_token_store, CookieTokenStore, LocalTokenStore, MemoryTokenStore, RefreshStatus,
    TokenPair, TokenRefreshCoordinator, TokenStore, TokenStoreError,
};
pub use client::{ResilientClient, ResilientClientBuilder};
pub use config::HttpConfig;
pub use errors::{AuthErrorCode, HttpError, HttpResult};
pub use health::{HealthCallback, HealthMonitor, HealthStatus};
pub use options::RequestOptions;
pub use signature::CallSignature;
pub use transport::{send_with_deadline, ReqwestTransport, Transport};
pub use types::{HttpMethod, HttpMethodError, HttpRequest, HttpResponse};

// Types surfaced through the client API
pub use bastion_caching::CacheStats;
pub use bastion_resilience::{CircuitState, CircuitStats, DedupStats, RetryPolicy};

#[cfg(any(test, feature = "testing"))]
pub use auth::MockTokenStore;
#[cfg(any(test, feature = "testing"))]
pub use transport::MockTransport;

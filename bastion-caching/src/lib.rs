//! Response caching for bastion
//!
//! [`RequestCache`] stores successful read responses keyed by call
//! signature, with lazy TTL expiry, LRU eviction and per-URL TTL strategies.

pub mod cache_control;
pub mod entry;
pub mod errors;
pub mod pattern;
pub mod request_cache;
pub mod stats;

pub use cache_control::CacheControl;
pub use entry::CacheEntry;
pub use errors::{CacheError, CacheResult};
pub use pattern::{CacheStrategy, GlobPattern, StrategySet};
pub use request_cache::{ReadTicket, RequestCache};
pub use stats::{CacheStats, StatsCollector};

//! Logging initialisation for bastion
//!
//! The library crates emit events through `tracing` and `log`; this crate
//! installs a `tracing-subscriber` pipeline configured from
//! [`LoggingConfig`](bastion_config::LoggingConfig). Initialisation is
//! idempotent so tests and embedding applications can call it freely.

pub mod init;

pub use init::{build_env_filter, init_logging_from_config, init_simple_tracing};

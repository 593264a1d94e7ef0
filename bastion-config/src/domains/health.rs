//! Health monitor configuration

use crate::error::ConfigResult;
use crate::validation::{validate_endpoint, validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Health monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Whether the monitor is started with the client
    #[serde(default = "crate::domains::utils::default_false")]
    pub enabled: bool,

    /// Endpoint probed with a GET request
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Time between probes
    #[serde(
        rename = "interval_ms",
        with = "crate::domains::utils::serde_duration_ms",
        default = "default_interval"
    )]
    pub interval: Duration,

    /// Deadline for a single probe
    #[serde(
        rename = "timeout_ms",
        with = "crate::domains::utils::serde_duration_ms",
        default = "default_timeout"
    )]
    pub timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_endpoint(),
            interval: default_interval(),
            timeout: default_timeout(),
        }
    }
}

impl Validatable for HealthConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_endpoint(&self.endpoint, "endpoint", self.domain_name())?;
        validate_positive(self.interval.as_millis(), "interval_ms", self.domain_name())?;
        validate_positive(self.timeout.as_millis(), "timeout_ms", self.domain_name())?;

        if self.timeout > self.interval {
            return Err(self.validation_error("timeout_ms must not exceed interval_ms"));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "health"
    }
}

fn default_endpoint() -> String {
    "/health".to_string()
}

fn default_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

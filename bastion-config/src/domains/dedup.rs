//! Request deduplication configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request deduplication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Whether identical concurrent calls are coalesced
    #[serde(default = "crate::domains::utils::default_true")]
    pub enabled: bool,

    /// Pending entries older than this are swept
    #[serde(
        rename = "max_age_ms",
        with = "crate::domains::utils::serde_duration_ms",
        default = "default_max_age"
    )]
    pub max_age: Duration,

    /// How often the sweeper runs
    #[serde(
        rename = "sweep_interval_ms",
        with = "crate::domains::utils::serde_duration_ms",
        default = "default_sweep_interval"
    )]
    pub sweep_interval: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age: default_max_age(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl Validatable for DedupConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.max_age.as_millis(), "max_age_ms", self.domain_name())?;
        validate_positive(
            self.sweep_interval.as_millis(),
            "sweep_interval_ms",
            self.domain_name(),
        )?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "dedup"
    }
}

fn default_max_age() -> Duration {
    Duration::from_secs(30)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(10)
}

//! Transport configuration

use bastion_config::ClientConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use crate::errors::{HttpError, HttpResult};

/// HTTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Base URL that relative request paths are joined to
    pub base_url: Option<String>,

    /// Default per-attempt deadline
    pub timeout: Duration,

    /// Maximum number of redirects to follow
    pub max_redirects: u32,

    /// User agent string
    pub user_agent: String,

    /// Whether to verify SSL certificates
    pub verify_ssl: bool,

    /// Headers attached to every request
    pub default_headers: BTreeMap<String, String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for HttpConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            timeout: config.timeout,
            max_redirects: config.max_redirects,
            user_agent: config.user_agent.clone(),
            verify_ssl: config.verify_ssl,
            default_headers: config.default_headers.clone(),
        }
    }
}

impl HttpConfig {
    /// Resolve `target` against the base URL.
    ///
    /// Absolute URLs pass through untouched. Without a base URL, relative
    /// targets are returned as given.
    pub fn resolve_url(&self, target: &str) -> HttpResult<String> {
        if Url::parse(target).is_ok() {
            return Ok(target.to_string());
        }

        let Some(base) = &self.base_url else {
            return Ok(target.to_string());
        };

        let mut base = Url::parse(base)
            .map_err(|e| HttpError::ConfigError(format!("Invalid base URL {}: {}", base, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        base.join(target.trim_start_matches('/'))
            .map(String::from)
            .map_err(|e| HttpError::InvalidRequest(format!("Cannot resolve {}: {}", target, e)))
    }
}

//! Configuration loading and environment variable handling

use crate::domains::BastionConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "BASTION".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<BastionConfig> {
        let content = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Loaded configuration file {}", path.as_ref().display());
        self.from_yaml_str(&content)
    }

    /// Load configuration from YAML text with environment overrides
    pub fn from_yaml_str(&self, content: &str) -> ConfigResult<BastionConfig> {
        let mut config: BastionConfig = serde_yaml::from_str(content)?;
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<BastionConfig> {
        let mut config = BastionConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<BastionConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut BastionConfig) -> ConfigResult<()> {
        self.apply_client_overrides(&mut config.client)?;
        self.apply_auth_overrides(&mut config.auth)?;
        self.apply_retry_overrides(&mut config.retry)?;
        self.apply_circuit_breaker_overrides(&mut config.circuit_breaker)?;
        self.apply_cache_overrides(&mut config.cache)?;
        self.apply_health_overrides(&mut config.health)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    fn apply_client_overrides(
        &self,
        config: &mut crate::domains::client::ClientConfig,
    ) -> ConfigResult<()> {
        if let Ok(base_url) = self.get_env_var("BASE_URL") {
            config.base_url = Some(base_url);
        }

        if let Some(timeout) = self.parse_env_var::<u64>("HTTP_TIMEOUT_MS")? {
            config.timeout = Duration::from_millis(timeout);
        }

        if let Ok(user_agent) = self.get_env_var("HTTP_USER_AGENT") {
            config.user_agent = user_agent;
        }

        if let Some(verify_ssl) = self.parse_env_var::<bool>("HTTP_VERIFY_SSL")? {
            config.verify_ssl = verify_ssl;
        }

        Ok(())
    }

    fn apply_auth_overrides(
        &self,
        config: &mut crate::domains::auth::AuthConfig,
    ) -> ConfigResult<()> {
        if let Ok(storage) = self.get_env_var("TOKEN_STORAGE") {
            config.storage = crate::domains::auth::StorageKind::from_str(&storage)
                .map_err(|e| ConfigError::EnvError(format!("Invalid TOKEN_STORAGE: {}", e)))?;
        }

        if let Ok(path) = self.get_env_var("TOKEN_STORAGE_PATH") {
            config.storage_options.path = Some(path);
        }

        Ok(())
    }

    fn apply_retry_overrides(
        &self,
        config: &mut crate::domains::retry::RetryConfig,
    ) -> ConfigResult<()> {
        if let Some(attempts) = self.parse_env_var::<u32>("RETRY_ATTEMPTS")? {
            config.attempts = attempts;
        }

        if let Ok(strategy) = self.get_env_var("RETRY_STRATEGY") {
            config.strategy = crate::domains::retry::RetryStrategyKind::from_str(&strategy)
                .map_err(|e| ConfigError::EnvError(format!("Invalid RETRY_STRATEGY: {}", e)))?;
        }

        if let Some(delay) = self.parse_env_var::<u64>("RETRY_DELAY_MS")? {
            config.delay = Duration::from_millis(delay);
        }

        Ok(())
    }

    fn apply_circuit_breaker_overrides(
        &self,
        config: &mut crate::domains::circuit_breaker::CircuitBreakerConfig,
    ) -> ConfigResult<()> {
        if let Some(threshold) = self.parse_env_var::<u32>("CIRCUIT_THRESHOLD")? {
            config.threshold = threshold;
        }

        if let Some(enabled) = self.parse_env_var::<bool>("CIRCUIT_ENABLED")? {
            config.enabled = enabled;
        }

        Ok(())
    }

    fn apply_cache_overrides(
        &self,
        config: &mut crate::domains::cache::CacheConfig,
    ) -> ConfigResult<()> {
        if let Some(enabled) = self.parse_env_var::<bool>("CACHE_ENABLED")? {
            config.enabled = enabled;
        }

        if let Some(max_size) = self.parse_env_var::<usize>("CACHE_MAX_SIZE")? {
            config.max_size = max_size;
        }

        Ok(())
    }

    fn apply_health_overrides(
        &self,
        config: &mut crate::domains::health::HealthConfig,
    ) -> ConfigResult<()> {
        if let Ok(endpoint) = self.get_env_var("HEALTH_ENDPOINT") {
            config.endpoint = endpoint;
            config.enabled = true;
        }

        Ok(())
    }

    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = crate::domains::logging::LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = crate::domains::logging::LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }

    /// Parse an optional prefixed environment variable
    fn parse_env_var<T>(&self, name: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_env_var(name) {
            Ok(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::EnvError(format!("Invalid {}: {}", name, e))),
            Err(_) => Ok(None),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::auth::StorageKind;
    use crate::domains::retry::RetryStrategyKind;
    use std::io::Write;

    #[test]
    fn test_from_file_with_env_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "client:\n  base_url: https://api.example.com\nretry:\n  attempts: 4\n  strategy: fixed\n"
        )
        .unwrap();

        temp_env::with_vars(
            [
                ("BTEST_RETRY_ATTEMPTS", Some("6")),
                ("BTEST_TOKEN_STORAGE", Some("cookie")),
            ],
            || {
                let config = ConfigLoader::with_prefix("BTEST").from_file(file.path()).unwrap();
                assert_eq!(config.client.base_url.as_deref(), Some("https://api.example.com"));
                assert_eq!(config.retry.attempts, 6);
                assert_eq!(config.retry.strategy, RetryStrategyKind::Fixed);
                assert_eq!(config.auth.storage, StorageKind::Cookie);
            },
        );
    }

    #[test]
    fn test_invalid_env_value() {
        temp_env::with_var("BTEST2_CACHE_MAX_SIZE", Some("lots"), || {
            let err = ConfigLoader::with_prefix("BTEST2").from_env().unwrap_err();
            assert!(matches!(err, ConfigError::EnvError(_)));
        });
    }

    #[test]
    fn test_validation_runs_after_overrides() {
        temp_env::with_var("BTEST3_RETRY_ATTEMPTS", Some("0"), || {
            let err = ConfigLoader::with_prefix("BTEST3").from_env().unwrap_err();
            assert!(matches!(err, ConfigError::DomainError { .. }));
        });
    }

    #[test]
    fn test_error_variants_by_source() {
        let loader = ConfigLoader::with_prefix("BTEST4");

        let err = loader.from_file("/nonexistent/bastion.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileReadError(_)));

        let err = loader.from_yaml_str("retry: [").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));

        let err = loader
            .from_yaml_str("client:\n  base_url: \"not a url\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::DomainError { ref domain, .. } if domain == "client"));
    }
}

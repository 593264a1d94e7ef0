//! Integration tests for bastion-config

use bastion_config::*;
use std::io::Write;
use std::time::Duration;
use temp_env::with_vars;

#[test]
fn test_default_config_validation() {
    let config = BastionConfig::default();
    assert!(config.validate_all().is_ok());
    assert_eq!(config.auth.storage, StorageKind::Memory);
    assert!(!config.health.enabled);
}

#[test]
fn test_config_loader_from_env() {
    let vars = vec![
        ("BASTION_HTTP_TIMEOUT_MS", Some("2500")),
        ("BASTION_RETRY_ATTEMPTS", Some("5")),
        ("BASTION_CACHE_MAX_SIZE", Some("200")),
        ("BASTION_LOG_LEVEL", Some("debug")),
        ("BASTION_HEALTH_ENDPOINT", Some("/status")),
    ];

    with_vars(vars, || {
        let config = ConfigLoader::new().from_env().unwrap();

        assert_eq!(config.client.timeout, Duration::from_millis(2500));
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.cache.max_size, 200);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.health.endpoint, "/status");
        assert!(config.health.enabled);
    });
}

#[test]
fn test_invalid_env_value_is_rejected() {
    with_vars([("BASTION_RETRY_ATTEMPTS", Some("many"))], || {
        assert!(matches!(
            ConfigLoader::new().from_env(),
            Err(ConfigError::EnvError(_))
        ));
    });
}

#[test]
fn test_comprehensive_config() {
    let yaml = r#"
client:
  base_url: "https://api.example.com/v1"
  timeout_ms: 8000
  user_agent: "bastion-test"

auth:
  login_endpoint: "/auth/login"
  refresh_endpoint: "/auth/refresh"
  token_source:
    type: body
    access_token_field: "data.accessToken"
    refresh_token_field: "data.refreshToken"
  storage: local
  storage_options:
    path: "/tmp/bastion-tokens.json"
  expiry_skew_ms: 15000

retry:
  attempts: 4
  strategy: fixed
  delay_ms: 250
  max_delay_ms: 1000
  conditions: [network, 5xx]

circuit_breaker:
  threshold: 3
  reset_timeout_ms: 10000

cache:
  max_size: 50
  default_ttl_ms: 60000
  strategies:
    - pattern: "/users/*"
      ttl_ms: 5000
    - pattern: "/live/*"
      enabled: false

dedup:
  max_age_ms: 20000

health:
  enabled: true
  endpoint: "/healthz"
  interval_ms: 10000
  timeout_ms: 2000

logging:
  level: warn
  format: json
"#;

    let config: BastionConfig = serde_yaml::from_str(yaml).unwrap();
    assert!(config.validate_all().is_ok());

    assert_eq!(config.client.base_url.as_deref(), Some("https://api.example.com/v1"));
    assert_eq!(config.client.timeout, Duration::from_secs(8));
    assert_eq!(config.auth.storage, StorageKind::Local);
    assert_eq!(config.auth.expiry_skew, Duration::from_secs(15));
    assert!(matches!(
        &config.auth.token_source,
        TokenSource::Body { access_token_field, .. } if access_token_field == "data.accessToken"
    ));
    assert_eq!(config.retry.strategy, RetryStrategyKind::Fixed);
    assert_eq!(
        config.retry.conditions,
        vec![RetryConditionKind::Network, RetryConditionKind::ServerError]
    );
    assert_eq!(config.circuit_breaker.threshold, 3);
    assert_eq!(config.cache.strategies.len(), 2);
    assert_eq!(config.cache.strategies[0].ttl, Some(Duration::from_secs(5)));
    assert!(!config.cache.strategies[1].enabled);
    assert_eq!(config.dedup.max_age, Duration::from_secs(20));
    assert_eq!(config.health.interval, Duration::from_secs(10));
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
fn test_local_storage_requires_path() {
    let yaml = r#"
auth:
  storage: local
"#;
    let error = ConfigLoader::new().from_yaml_str(yaml).unwrap_err();
    assert!(error.to_string().contains("storage_options.path"));
}

#[test]
fn test_health_timeout_must_fit_interval() {
    let mut config = BastionConfig::default();
    config.health.interval = Duration::from_secs(1);
    config.health.timeout = Duration::from_secs(2);
    assert!(config.validate_all().is_err());
}

#[test]
fn test_file_with_env_override() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "retry:\n  attempts: 2\ncache:\n  enabled: true").unwrap();

    with_vars([("BASTION_CACHE_ENABLED", Some("false"))], || {
        let config = ConfigLoader::new().load(Some(file.path())).unwrap();
        assert_eq!(config.retry.attempts, 2);
        assert!(!config.cache.enabled);
    });
}

#[test]
fn test_sample_config_parses() {
    let sample = BastionConfig::generate_sample();
    assert!(sample.contains("circuit_breaker"));
    let parsed: BastionConfig = serde_yaml::from_str(&sample).unwrap();
    assert!(parsed.validate_all().is_ok());
}

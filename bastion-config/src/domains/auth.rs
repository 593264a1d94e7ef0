//! Authentication and token storage configuration

use crate::error::ConfigResult;
use crate::validation::{validate_endpoint, validate_positive, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Endpoint receiving credentials and returning a token pair
    #[serde(default = "default_login_endpoint")]
    pub login_endpoint: String,

    /// Endpoint exchanging a refresh token for a new token pair
    #[serde(default = "default_refresh_endpoint")]
    pub refresh_endpoint: String,

    /// Best-effort logout endpoint
    #[serde(default = "default_logout_endpoint")]
    pub logout_endpoint: String,

    /// Where login and refresh responses carry the tokens
    #[serde(default)]
    pub token_source: TokenSource,

    /// JSON field used to send the refresh token to the refresh endpoint
    #[serde(default = "default_refresh_request_field")]
    pub refresh_request_field: String,

    /// Header carrying the access token
    #[serde(default = "default_header_name")]
    pub header_name: String,

    /// Scheme prefixed to the access token
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Token storage backend
    #[serde(default)]
    pub storage: StorageKind,

    /// Options for the selected storage backend
    #[serde(default)]
    pub storage_options: StorageOptions,

    /// Store key for the access token
    #[serde(default = "default_access_token_key")]
    pub access_token_key: String,

    /// Store key for the refresh token
    #[serde(default = "default_refresh_token_key")]
    pub refresh_token_key: String,

    /// Deadline for the refresh network call
    #[serde(
        rename = "refresh_timeout_ms",
        with = "crate::domains::utils::serde_duration_ms",
        default = "default_refresh_timeout"
    )]
    pub refresh_timeout: Duration,

    /// Access tokens closer than this to their `exp` claim are refreshed before use
    #[serde(
        rename = "expiry_skew_ms",
        with = "crate::domains::utils::serde_duration_ms",
        default = "default_expiry_skew"
    )]
    pub expiry_skew: Duration,

    /// Refresh ahead of sending when the access token is known to be expired
    #[serde(default = "crate::domains::utils::default_true")]
    pub proactive_refresh: bool,
}

/// How tokens are delivered by the login and refresh endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TokenSource {
    /// Tokens are fields of the JSON response body (dotted paths allowed)
    Body {
        #[serde(default = "default_access_token_field")]
        access_token_field: String,
        #[serde(default = "default_refresh_token_field")]
        refresh_token_field: String,
        #[serde(default = "default_user_field")]
        user_field: Option<String>,
    },
    /// Tokens are delivered as `Set-Cookie` headers
    Cookies {
        #[serde(default = "default_access_token_key")]
        access_cookie: String,
        #[serde(default = "default_refresh_token_key")]
        refresh_cookie: String,
    },
}

/// Token storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Persist tokens to a local JSON file
    Local,
    /// Keep tokens as cookie records attached to outgoing requests
    Cookie,
    /// Keep tokens in process memory only
    #[default]
    Memory,
}

/// Options for the token storage backends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    /// File used by the `local` backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Cookie domain used by the `cookie` backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_domain: Option<String>,

    /// Cookie path used by the `cookie` backend
    #[serde(default = "default_cookie_path")]
    pub cookie_path: String,

    /// Whether cookies are marked `Secure`
    #[serde(default = "crate::domains::utils::default_true")]
    pub secure: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_endpoint: default_login_endpoint(),
            refresh_endpoint: default_refresh_endpoint(),
            logout_endpoint: default_logout_endpoint(),
            token_source: TokenSource::default(),
            refresh_request_field: default_refresh_request_field(),
            header_name: default_header_name(),
            scheme: default_scheme(),
            storage: StorageKind::default(),
            storage_options: StorageOptions::default(),
            access_token_key: default_access_token_key(),
            refresh_token_key: default_refresh_token_key(),
            refresh_timeout: default_refresh_timeout(),
            expiry_skew: default_expiry_skew(),
            proactive_refresh: true,
        }
    }
}

impl Default for TokenSource {
    fn default() -> Self {
        TokenSource::Body {
            access_token_field: default_access_token_field(),
            refresh_token_field: default_refresh_token_field(),
            user_field: default_user_field(),
        }
    }
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            path: None,
            cookie_domain: None,
            cookie_path: default_cookie_path(),
            secure: true,
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::Local => write!(f, "local"),
            StorageKind::Cookie => write!(f, "cookie"),
            StorageKind::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "file" => Ok(StorageKind::Local),
            "cookie" | "cookies" => Ok(StorageKind::Cookie),
            "memory" => Ok(StorageKind::Memory),
            _ => Err(format!("Invalid storage kind: {}", s)),
        }
    }
}

impl AuthConfig {
    /// Whether `url` targets one of the authentication endpoints
    pub fn is_auth_endpoint(&self, url: &str) -> bool {
        [
            &self.login_endpoint,
            &self.refresh_endpoint,
            &self.logout_endpoint,
        ]
        .iter()
        .any(|endpoint| !endpoint.is_empty() && url_targets(url, endpoint))
    }
}

/// Compare paths while ignoring query strings and a trailing slash
fn url_targets(url: &str, endpoint: &str) -> bool {
    let strip = |s: &str| -> String {
        let s = s.split(['?', '#']).next().unwrap_or(s);
        s.trim_end_matches('/').to_string()
    };
    let url = strip(url);
    let endpoint = strip(endpoint);
    url == endpoint || url.ends_with(&endpoint)
}

impl Validatable for AuthConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_endpoint(&self.login_endpoint, "login_endpoint", self.domain_name())?;
        validate_endpoint(&self.refresh_endpoint, "refresh_endpoint", self.domain_name())?;
        validate_endpoint(&self.logout_endpoint, "logout_endpoint", self.domain_name())?;
        validate_required_string(&self.header_name, "header_name", self.domain_name())?;
        validate_required_string(&self.access_token_key, "access_token_key", self.domain_name())?;
        validate_required_string(&self.refresh_token_key, "refresh_token_key", self.domain_name())?;
        validate_required_string(
            &self.refresh_request_field,
            "refresh_request_field",
            self.domain_name(),
        )?;
        validate_positive(
            self.refresh_timeout.as_millis(),
            "refresh_timeout_ms",
            self.domain_name(),
        )?;

        if self.access_token_key == self.refresh_token_key {
            return Err(self.validation_error("access_token_key and refresh_token_key must differ"));
        }

        match &self.token_source {
            TokenSource::Body {
                access_token_field,
                refresh_token_field,
                ..
            } => {
                validate_required_string(access_token_field, "access_token_field", self.domain_name())?;
                validate_required_string(refresh_token_field, "refresh_token_field", self.domain_name())?;
            }
            TokenSource::Cookies {
                access_cookie,
                refresh_cookie,
            } => {
                validate_required_string(access_cookie, "access_cookie", self.domain_name())?;
                validate_required_string(refresh_cookie, "refresh_cookie", self.domain_name())?;
            }
        }

        if self.storage == StorageKind::Local && self.storage_options.path.is_none() {
            return Err(self.validation_error("local token storage requires storage_options.path"));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "auth"
    }
}

// Default value functions
fn default_login_endpoint() -> String {
    "/auth/login".to_string()
}

fn default_refresh_endpoint() -> String {
    "/auth/refresh".to_string()
}

fn default_logout_endpoint() -> String {
    "/auth/logout".to_string()
}

fn default_refresh_request_field() -> String {
    "refreshToken".to_string()
}

fn default_header_name() -> String {
    "Authorization".to_string()
}

fn default_scheme() -> String {
    "Bearer".to_string()
}

fn default_access_token_key() -> String {
    "access_token".to_string()
}

fn default_refresh_token_key() -> String {
    "refresh_token".to_string()
}

fn default_access_token_field() -> String {
    "accessToken".to_string()
}

fn default_refresh_token_field() -> String {
    "refreshToken".to_string()
}

fn default_user_field() -> Option<String> {
    Some("user".to_string())
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn default_refresh_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_expiry_skew() -> Duration {
    Duration::from_secs(30)
}

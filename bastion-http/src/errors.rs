//! HTTP error types
//!
//! Every failure is classified into a [`FailureKind`] so the retry and
//! circuit breaker logic never has to look at message text. `HttpError` is
//! `Clone` because deduplicated and refresh outcomes are handed to every
//! joined caller.

use bastion_resilience::{FailureKind, OperationAborted, RetryAttempt, RetryError, Retryable};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::time::Duration;

use crate::types::{HttpMethodError, HttpResponse};

/// Result type for HTTP operations
pub type HttpResult<T> = Result<T, HttpError>;

/// Machine-readable code carried by authentication errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthErrorCode {
    TokenExpired,
    RefreshTokenExpired,
    ReauthenticationRequired,
    InvalidCredentials,
    Forbidden,
}

impl AuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthErrorCode::TokenExpired => "TOKEN_EXPIRED",
            AuthErrorCode::RefreshTokenExpired => "REFRESH_TOKEN_EXPIRED",
            AuthErrorCode::ReauthenticationRequired => "REAUTHENTICATION_REQUIRED",
            AuthErrorCode::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthErrorCode::Forbidden => "FORBIDDEN",
        }
    }

    /// Whether the caller must log in again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthErrorCode::RefreshTokenExpired | AuthErrorCode::ReauthenticationRequired
        )
    }

    fn from_str_loose(code: &str) -> Option<Self> {
        match code.to_ascii_uppercase().as_str() {
            "TOKEN_EXPIRED" => Some(AuthErrorCode::TokenExpired),
            "REFRESH_TOKEN_EXPIRED" => Some(AuthErrorCode::RefreshTokenExpired),
            "REAUTHENTICATION_REQUIRED" => Some(AuthErrorCode::ReauthenticationRequired),
            "INVALID_CREDENTIALS" => Some(AuthErrorCode::InvalidCredentials),
            "FORBIDDEN" => Some(AuthErrorCode::Forbidden),
            _ => None,
        }
    }
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for HTTP operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum HttpError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Authentication error ({status}): {message}")]
    Auth {
        status: u16,
        code: Option<AuthErrorCode>,
        message: String,
    },

    #[error("Client error ({status}): {message}")]
    Client {
        status: u16,
        message: String,
        body: JsonValue,
    },

    #[error("Server error ({status}): {message}")]
    Server {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Circuit breaker is open")]
    CircuitOpen { retry_after: Option<Duration> },

    #[error("{last} (gave up after {} attempts)", .log.len())]
    RetriesExhausted {
        log: Vec<RetryAttempt>,
        last: Box<HttpError>,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(#[from] HttpMethodError),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Token store error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Operation aborted: {0}")]
    Aborted(String),
}

impl HttpError {
    /// Terminal error telling the caller that credentials must be re-established
    pub fn reauthentication_required(message: impl Into<String>) -> Self {
        HttpError::Auth {
            status: 401,
            code: Some(AuthErrorCode::ReauthenticationRequired),
            message: message.into(),
        }
    }

    pub fn auth(status: u16, code: AuthErrorCode, message: impl Into<String>) -> Self {
        HttpError::Auth {
            status,
            code: Some(code),
            message: message.into(),
        }
    }

    /// Classify a non-2xx response
    pub fn from_response(response: &HttpResponse) -> Self {
        let status = response.status;
        let message = extract_message(&response.body).unwrap_or_else(|| {
            http::StatusCode::from_u16(status)
                .ok()
                .and_then(|code| code.canonical_reason())
                .unwrap_or("Unknown Status")
                .to_string()
        });

        match FailureKind::from_status(status) {
            Some(FailureKind::Auth) => {
                let code = extract_code(&response.body).or(match status {
                    403 => Some(AuthErrorCode::Forbidden),
                    _ => None,
                });
                HttpError::Auth {
                    status,
                    code,
                    message,
                }
            }
            Some(FailureKind::Timeout) => HttpError::Timeout(message),
            Some(FailureKind::Server) => HttpError::Server {
                status,
                message,
                retry_after: response.header("retry-after").and_then(parse_retry_after),
            },
            _ => HttpError::Client {
                status,
                message,
                body: response.body.clone(),
            },
        }
    }

    /// Collapse a retry outcome, keeping the attempt log when retries happened
    pub fn from_retry(error: RetryError<HttpError>) -> Self {
        let (log, last) = error.into_parts();
        if log.len() <= 1 {
            last
        } else {
            HttpError::RetriesExhausted {
                log,
                last: Box::new(last),
            }
        }
    }

    /// The last underlying failure, looking through retry exhaustion
    pub fn root(&self) -> &HttpError {
        match self {
            HttpError::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }

    /// HTTP status of the failure, if a response was received
    pub fn status(&self) -> Option<u16> {
        match self.root() {
            HttpError::Auth { status, .. }
            | HttpError::Client { status, .. }
            | HttpError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Auth error code, if any
    pub fn code(&self) -> Option<AuthErrorCode> {
        match self.root() {
            HttpError::Auth { code, .. } => *code,
            _ => None,
        }
    }

    /// Human-readable message of the root failure
    pub fn message(&self) -> String {
        match self.root() {
            HttpError::Auth { message, .. }
            | HttpError::Client { message, .. }
            | HttpError::Server { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Attempts made before giving up, empty if the call was not retried
    pub fn attempt_log(&self) -> &[RetryAttempt] {
        match self {
            HttpError::RetriesExhausted { log, .. } => log,
            _ => &[],
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self.root(), HttpError::Auth { status: 401, .. })
    }

    /// Error that ends the session rather than the single call
    pub fn is_terminal_auth(&self) -> bool {
        self.code().map(|code| code.is_terminal()).unwrap_or(false)
    }
}

impl Retryable for HttpError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            HttpError::Network(_) => FailureKind::Network,
            HttpError::Timeout(_) => FailureKind::Timeout,
            HttpError::Auth { .. } => FailureKind::Auth,
            HttpError::Client { .. } => FailureKind::Client,
            HttpError::Server { .. } => FailureKind::Server,
            HttpError::CircuitOpen { .. } => FailureKind::CircuitOpen,
            HttpError::RetriesExhausted { last, .. } => last.failure_kind(),
            HttpError::InvalidRequest(_)
            | HttpError::InvalidMethod(_)
            | HttpError::InvalidJson(_)
            | HttpError::Storage(_)
            | HttpError::ConfigError(_) => FailureKind::Client,
            HttpError::Aborted(_) => FailureKind::Other,
        }
    }

    fn retry_delay(&self) -> Option<Duration> {
        match self {
            HttpError::Server { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<OperationAborted> for HttpError {
    fn from(error: OperationAborted) -> Self {
        HttpError::Aborted(error.0)
    }
}

impl From<serde_json::Error> for HttpError {
    fn from(error: serde_json::Error) -> Self {
        HttpError::InvalidJson(error.to_string())
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            HttpError::Timeout(error.to_string())
        } else if error.is_connect() || error.is_request() {
            HttpError::Network(error.to_string())
        } else if error.is_builder() {
            HttpError::InvalidRequest(error.to_string())
        } else if error.is_decode() {
            HttpError::InvalidJson(error.to_string())
        } else {
            // Opaque failure: fall back to the message classifier
            match FailureKind::from_message(&error.to_string()) {
                FailureKind::Timeout => HttpError::Timeout(error.to_string()),
                _ => HttpError::Network(error.to_string()),
            }
        }
    }
}

impl<E: Into<HttpError>> From<bastion_resilience::CircuitBreakerError<E>> for HttpError {
    fn from(error: bastion_resilience::CircuitBreakerError<E>) -> Self {
        match error {
            bastion_resilience::CircuitBreakerError::Open { retry_after } => {
                HttpError::CircuitOpen { retry_after }
            }
            bastion_resilience::CircuitBreakerError::Inner(inner) => inner.into(),
        }
    }
}

fn extract_message(body: &JsonValue) -> Option<String> {
    match body {
        JsonValue::String(text) if !text.is_empty() => Some(text.clone()),
        JsonValue::Object(map) => ["message", "error_description", "error", "detail"]
            .iter()
            .find_map(|field| map.get(*field).and_then(|value| value.as_str()))
            .map(str::to_string),
        _ => None,
    }
}

fn extract_code(body: &JsonValue) -> Option<AuthErrorCode> {
    ["code", "error"]
        .iter()
        .find_map(|field| body.get(*field).and_then(|value| value.as_str()))
        .and_then(AuthErrorCode::from_str_loose)
}

fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

//! Failure classification shared by the retry and circuit breaker logic

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Classified kind of a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Unreachable host, DNS failure, connection reset
    Network,
    /// Deadline exceeded
    Timeout,
    /// 5xx response
    Server,
    /// Rejected by an open circuit before dispatch
    CircuitOpen,
    /// 401/403 response
    Auth,
    /// Any other 4xx response
    Client,
    /// Could not be classified
    Other,
}

impl FailureKind {
    /// Classify a failure from its status code alone
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            401 | 403 => Some(FailureKind::Auth),
            408 => Some(FailureKind::Timeout),
            400..=499 => Some(FailureKind::Client),
            500..=599 => Some(FailureKind::Server),
            _ => None,
        }
    }

    /// Last-resort classifier that inspects an error message.
    ///
    /// Only used for errors that arrive without a structured kind, e.g.
    /// opaque transport errors. Structured classification always wins.
    pub fn from_message(message: &str) -> Self {
        let message = message.to_lowercase();

        if message.contains("timed out") || message.contains("timeout") || message.contains("deadline") {
            FailureKind::Timeout
        } else if message.contains("circuit") && message.contains("open") {
            FailureKind::CircuitOpen
        } else if message.contains("unauthorized") || message.contains("forbidden") {
            FailureKind::Auth
        } else if message.contains("connection")
            || message.contains("dns")
            || message.contains("network")
            || message.contains("reset")
            || message.contains("refused")
            || message.contains("unreachable")
        {
            FailureKind::Network
        } else {
            FailureKind::Other
        }
    }

    /// Whether the downstream is considered unhealthy for this kind.
    ///
    /// Auth and client errors mean the downstream answered, so they do not
    /// count against the circuit. Circuit-open rejections never reached it.
    pub fn counts_as_downstream_failure(&self) -> bool {
        matches!(
            self,
            FailureKind::Network | FailureKind::Timeout | FailureKind::Server | FailureKind::Other
        )
    }

    /// Auth and other 4xx failures are never retried
    pub fn is_never_retried(&self) -> bool {
        matches!(self, FailureKind::Auth | FailureKind::Client)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Network => "network",
            FailureKind::Timeout => "timeout",
            FailureKind::Server => "server",
            FailureKind::CircuitOpen => "circuit_open",
            FailureKind::Auth => "auth",
            FailureKind::Client => "client",
            FailureKind::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// Trait for errors that the resilience layer can classify
pub trait Retryable {
    /// Classified kind of this failure
    fn failure_kind(&self) -> FailureKind;

    /// Server-suggested delay before the next attempt, if any
    fn retry_delay(&self) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert_eq!(FailureKind::from_status(401), Some(FailureKind::Auth));
        assert_eq!(FailureKind::from_status(403), Some(FailureKind::Auth));
        assert_eq!(FailureKind::from_status(404), Some(FailureKind::Client));
        assert_eq!(FailureKind::from_status(503), Some(FailureKind::Server));
        assert_eq!(FailureKind::from_status(200), None);
    }

    #[test]
    fn test_message_fallback() {
        assert_eq!(FailureKind::from_message("operation timed out"), FailureKind::Timeout);
        assert_eq!(FailureKind::from_message("Connection refused (os error 111)"), FailureKind::Network);
        assert_eq!(FailureKind::from_message("Circuit breaker is open"), FailureKind::CircuitOpen);
        assert_eq!(FailureKind::from_message("something odd"), FailureKind::Other);
    }

    #[test]
    fn test_downstream_accounting() {
        assert!(FailureKind::Server.counts_as_downstream_failure());
        assert!(FailureKind::Timeout.counts_as_downstream_failure());
        assert!(!FailureKind::Client.counts_as_downstream_failure());
        assert!(!FailureKind::Auth.counts_as_downstream_failure());
        assert!(!FailureKind::CircuitOpen.counts_as_downstream_failure());
    }
}

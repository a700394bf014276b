use std::time::Duration;
use thiserror::Error;

/// Classification of a call failure, used to drive retry decisions and
/// per-service error counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// 5xx responses and transport-level failures. Retryable.
    ServerError,
    /// 4xx responses. Never retried.
    ClientError,
    /// 3xx responses. Not retried, logged.
    Redirect,
    /// Anything else. Not retried, logged.
    Unknown,
}

impl ErrorKind {
    /// Classify an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            s if s >= 500 => ErrorKind::ServerError,
            400..=499 => ErrorKind::ClientError,
            300..=399 => ErrorKind::Redirect,
            _ => ErrorKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ServerError => "SERVER_ERROR",
            ErrorKind::ClientError => "CLIENT_ERROR",
            ErrorKind::Redirect => "REDIRECT",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one outbound call attempt.
#[derive(Error, Debug, Clone)]
pub enum CallError {
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("client error ({status}): {message}")]
    Client { status: u16, message: String },

    #[error("unexpected redirect ({status}): {message}")]
    Redirect { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("call to {destination} timed out after {timeout:?}")]
    Timeout {
        destination: String,
        timeout: Duration,
    },

    #[error("circuit open for {destination}")]
    CircuitOpen { destination: String },

    #[error("unexpected response ({status}): {message}")]
    Unexpected { status: u16, message: String },
}

impl CallError {
    /// Build the appropriate variant from an HTTP status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match ErrorKind::from_status(status) {
            ErrorKind::ServerError => CallError::Server { status, message },
            ErrorKind::ClientError => CallError::Client { status, message },
            ErrorKind::Redirect => CallError::Redirect { status, message },
            ErrorKind::Unknown => CallError::Unexpected { status, message },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::Server { .. }
            | CallError::Transport(_)
            | CallError::Timeout { .. } => ErrorKind::ServerError,
            CallError::Client { .. } => ErrorKind::ClientError,
            CallError::Redirect { .. } => ErrorKind::Redirect,
            CallError::CircuitOpen { .. } | CallError::Unexpected { .. } => ErrorKind::Unknown,
        }
    }

    /// Whether the failure class is worth another attempt at all. The retry
    /// path additionally consults the destination's circuit breaker.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, CallError::CircuitOpen { .. }) && self.kind() == ErrorKind::ServerError
    }
}

/// Errors from the core's own bookkeeping surfaces (configuration, rule
/// CRUD, correlation-id validation). Call failures are `CallError`.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown metric path: {0}")]
    UnknownMetric(String),

    #[error("alert rule not found: {0}")]
    RuleNotFound(uuid::Uuid),

    #[error("invalid correlation id: {0}")]
    InvalidCorrelationId(String),

    #[error("invalid rule: {0}")]
    InvalidRule(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ErrorKind::from_status(500), ErrorKind::ServerError);
        assert_eq!(ErrorKind::from_status(503), ErrorKind::ServerError);
        assert_eq!(ErrorKind::from_status(404), ErrorKind::ClientError);
        assert_eq!(ErrorKind::from_status(301), ErrorKind::Redirect);
        assert_eq!(ErrorKind::from_status(200), ErrorKind::Unknown);
    }

    #[test]
    fn test_client_errors_never_retryable() {
        let err = CallError::from_status(404, "not found");
        assert_eq!(err.kind(), ErrorKind::ClientError);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_server_and_transport_errors_retryable() {
        assert!(CallError::from_status(502, "bad gateway").is_retryable());
        assert!(CallError::Transport("connection refused".into()).is_retryable());
        assert!(CallError::Timeout {
            destination: "billing".into(),
            timeout: Duration::from_secs(5),
        }
        .is_retryable());
    }

    #[test]
    fn test_circuit_open_not_retryable() {
        let err = CallError::CircuitOpen {
            destination: "billing".into(),
        };
        assert!(!err.is_retryable());
    }
}

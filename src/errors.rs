//! Error types and outcome categorization.
//!
//! Per-request failures are classified into an [`ErrorCategory`] so the final
//! report and the Prometheus export can break errors down by kind. Run-level
//! failures are [`LoadTestError`]; only those ever reach the caller.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

/// Categories of error outcomes that can occur during a load test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Response arrived but was not a 200 and not a 4xx/5xx (1xx, 201, 3xx...)
    UnexpectedStatus,

    /// HTTP 4xx errors (client errors)
    ClientError,

    /// HTTP 5xx errors (server errors)
    ServerError,

    /// Network connectivity errors (DNS, connection refused, etc.)
    NetworkError,

    /// Request exceeded its deadline
    TimeoutError,

    /// TLS/SSL certificate errors
    TlsError,

    /// Other/unknown errors
    OtherError,
}

impl ErrorCategory {
    /// Categorize an HTTP status code.
    ///
    /// Only `200` counts as a success; every other status is an error outcome.
    /// Returns `None` for 200.
    pub fn from_status_code(status_code: u16) -> Option<Self> {
        match status_code {
            200 => None,
            400..=499 => Some(ErrorCategory::ClientError),
            500..=599 => Some(ErrorCategory::ServerError),
            100..=399 => Some(ErrorCategory::UnexpectedStatus),
            _ => Some(ErrorCategory::OtherError),
        }
    }

    /// Categorize a reqwest error.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            ErrorCategory::TimeoutError
        } else if error.is_connect() || error.is_request() || error.is_body() || error.is_decode()
        {
            ErrorCategory::NetworkError
        } else if error.is_redirect() {
            ErrorCategory::ClientError
        } else {
            Self::from_message(&error.to_string())
        }
    }

    fn from_message(message: &str) -> Self {
        let msg = message.to_lowercase();

        if msg.contains("certificate") || msg.contains("tls") || msg.contains("ssl") {
            ErrorCategory::TlsError
        } else if msg.contains("timeout") || msg.contains("timed out") {
            ErrorCategory::TimeoutError
        } else if msg.contains("dns")
            || msg.contains("resolve")
            || msg.contains("connect")
            || msg.contains("connection")
        {
            ErrorCategory::NetworkError
        } else {
            ErrorCategory::OtherError
        }
    }

    /// Get the Prometheus label for this error category.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::UnexpectedStatus => "unexpected_status",
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::TlsError => "tls_error",
            ErrorCategory::OtherError => "other_error",
        }
    }

    /// Get a human-readable description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::UnexpectedStatus => "Non-200 Responses (1xx/2xx/3xx)",
            ErrorCategory::ClientError => "HTTP 4xx Client Errors",
            ErrorCategory::ServerError => "HTTP 5xx Server Errors",
            ErrorCategory::NetworkError => "Network/Connection Errors",
            ErrorCategory::TimeoutError => "Request Timeout Errors",
            ErrorCategory::TlsError => "TLS/SSL Certificate Errors",
            ErrorCategory::OtherError => "Other/Unknown Errors",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Failure of a single transport call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request exceeded deadline of {0:?}")]
    Deadline(Duration),

    #[error("unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    #[error("{message}")]
    Failed {
        category: ErrorCategory,
        message: String,
    },
}

impl TransportError {
    /// Category used when this failure is folded into the aggregate.
    ///
    /// `UnsupportedMethod` is a configuration rejection, never an error outcome,
    /// and has no category.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            TransportError::Deadline(_) => Some(ErrorCategory::TimeoutError),
            TransportError::UnsupportedMethod(_) => None,
            TransportError::Failed { category, .. } => Some(*category),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        TransportError::Failed {
            category: ErrorCategory::from_reqwest_error(&error),
            message: error.to_string(),
        }
    }
}

/// Errors that abort a whole run.
#[derive(Error, Debug)]
pub enum LoadTestError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("drain stalled: {outstanding} tokens outstanding but no worker is alive")]
    DrainStalled { outstanding: u64 },

    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

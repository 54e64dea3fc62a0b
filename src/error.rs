//! Error types for the registry access layer
//!
//! This module provides the closed error taxonomy used by every resilience
//! component, structured error codes, and production-safe logging helpers.
//! Dispatch decisions (retry, breaker tracking, recovery selection) are made
//! on [`ErrorKind`], never on formatted messages.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for access layer operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Transient failure causes (retryable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransientKind {
    /// Upstream call exceeded its deadline
    Timeout,
    /// Connection reset, refused or dropped
    ConnectionReset,
    /// Upstream answered with a 5xx status
    ServerError(u16),
    /// Upstream answered 429 or local admission rejected the call
    RateLimited,
}

/// Permanent failure causes (never retried, may still use fallback)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PermanentKind {
    /// Requested record does not exist upstream
    NotFound,
    /// Request rejected as invalid
    Validation,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::ConnectionReset => write!(f, "connection reset"),
            Self::ServerError(status) => write!(f, "server error {status}"),
            Self::RateLimited => write!(f, "rate limited"),
        }
    }
}

impl fmt::Display for PermanentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::Validation => write!(f, "validation"),
        }
    }
}

/// Pipeline stages recorded as failure provenance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    Deduplication,
    Queue,
    RateLimit,
    CircuitBreaker,
    Retry,
    Recovery,
    RecoveryRetry,
    Fallback,
}

/// Error taxonomy for the access layer
#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    /// Retryable upstream failure
    #[error("Transient upstream error ({kind}): {message}")]
    Transient { kind: TransientKind, message: String },

    /// Non-retryable upstream failure
    #[error("Permanent upstream error ({kind}): {message}")]
    Permanent { kind: PermanentKind, message: String },

    /// Synthetic fast-fail from an open circuit breaker
    #[error("Circuit breaker open for endpoint '{endpoint}' (retry in {retry_after:?})")]
    CircuitOpen {
        endpoint: String,
        retry_after: Duration,
    },

    /// Every resilience layer was exhausted
    #[error("All recovery layers exhausted after {stages:?}: {source}")]
    RecoveryFailed {
        source: Box<RegistryError>,
        stages: Vec<PipelineStage>,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Cache errors
    #[error("Cache error: {0}")]
    Cache(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Closed tag identifying the kind of an error, used for typed dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Timeout,
    Connection,
    ServerError,
    RateLimited,
    NotFound,
    Validation,
    CircuitOpen,
    RecoveryFailed,
    Config,
    Serialization,
    Cache,
    Internal,
}

impl ErrorKind {
    /// Kinds classified as transient upstream failures
    pub const TRANSIENT: [ErrorKind; 4] = [
        ErrorKind::Timeout,
        ErrorKind::Connection,
        ErrorKind::ServerError,
        ErrorKind::RateLimited,
    ];
}

/// Structured error code for machine-readable error handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Upstream transport errors (1000-1099)
    UpstreamTimeout,
    ConnectionReset,

    // Upstream response errors (1100-1199)
    UpstreamServerError,
    RecordNotFound,
    ValidationFailed,

    // Admission errors (1500-1599)
    RateLimitExceeded,

    // Resilience errors (1600-1699)
    CircuitOpen,
    RecoveryExhausted,

    // Local errors (1900-1999)
    ConfigurationInvalid,
    SerializationFailed,
    CacheFailure,
    InternalError,
}

impl ErrorCode {
    /// Get numeric error code
    pub fn as_number(&self) -> u32 {
        match self {
            ErrorCode::UpstreamTimeout => 1001,
            ErrorCode::ConnectionReset => 1002,

            ErrorCode::UpstreamServerError => 1101,
            ErrorCode::RecordNotFound => 1102,
            ErrorCode::ValidationFailed => 1103,

            ErrorCode::RateLimitExceeded => 1501,

            ErrorCode::CircuitOpen => 1601,
            ErrorCode::RecoveryExhausted => 1602,

            ErrorCode::ConfigurationInvalid => 1901,
            ErrorCode::SerializationFailed => 1902,
            ErrorCode::CacheFailure => 1903,
            ErrorCode::InternalError => 1904,
        }
    }

    /// Get error category
    pub fn category(&self) -> &'static str {
        match self.as_number() {
            1000..=1099 => "transport",
            1100..=1199 => "upstream",
            1500..=1599 => "admission",
            1600..=1699 => "resilience",
            1900..=1999 => "internal",
            _ => "unknown",
        }
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Low severity - information only
    Info,
    /// Medium severity - warning condition
    Warning,
    /// High severity - error condition
    Error,
    /// Critical severity - immediate attention required
    Critical,
}

impl RegistryError {
    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Transient {
            kind: TransientKind::Timeout,
            message: msg.into(),
        }
    }

    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Transient {
            kind: TransientKind::ConnectionReset,
            message: msg.into(),
        }
    }

    /// Create an upstream 5xx error
    pub fn server_error<S: Into<String>>(status: u16, msg: S) -> Self {
        Self::Transient {
            kind: TransientKind::ServerError(status),
            message: msg.into(),
        }
    }

    /// Create a rate limit error
    pub fn rate_limited<S: Into<String>>(msg: S) -> Self {
        Self::Transient {
            kind: TransientKind::RateLimited,
            message: msg.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::Permanent {
            kind: PermanentKind::NotFound,
            message: msg.into(),
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Permanent {
            kind: PermanentKind::Validation,
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a cache error
    pub fn cache<S: Into<String>>(msg: S) -> Self {
        Self::Cache(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Get the dispatch tag of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient { kind, .. } => match kind {
                TransientKind::Timeout => ErrorKind::Timeout,
                TransientKind::ConnectionReset => ErrorKind::Connection,
                TransientKind::ServerError(_) => ErrorKind::ServerError,
                TransientKind::RateLimited => ErrorKind::RateLimited,
            },
            Self::Permanent { kind, .. } => match kind {
                PermanentKind::NotFound => ErrorKind::NotFound,
                PermanentKind::Validation => ErrorKind::Validation,
            },
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::RecoveryFailed { .. } => ErrorKind::RecoveryFailed,
            Self::Config(_) => ErrorKind::Config,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Cache(_) => ErrorKind::Cache,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Unwrap provenance wrappers down to the error that started the failure
    pub fn root_cause(&self) -> &RegistryError {
        match self {
            Self::RecoveryFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Stages attempted before this error reached the caller
    pub fn stages(&self) -> &[PipelineStage] {
        match self {
            Self::RecoveryFailed { stages, .. } => stages,
            _ => &[],
        }
    }

    /// Check if error is transient
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Check if error is retryable with the default classification
    pub fn is_retryable(&self) -> bool {
        ErrorKind::TRANSIENT.contains(&self.kind())
    }

    /// Map to a structured error code
    pub fn to_error_code(&self) -> ErrorCode {
        match self.kind() {
            ErrorKind::Timeout => ErrorCode::UpstreamTimeout,
            ErrorKind::Connection => ErrorCode::ConnectionReset,
            ErrorKind::ServerError => ErrorCode::UpstreamServerError,
            ErrorKind::RateLimited => ErrorCode::RateLimitExceeded,
            ErrorKind::NotFound => ErrorCode::RecordNotFound,
            ErrorKind::Validation => ErrorCode::ValidationFailed,
            ErrorKind::CircuitOpen => ErrorCode::CircuitOpen,
            ErrorKind::RecoveryFailed => ErrorCode::RecoveryExhausted,
            ErrorKind::Config => ErrorCode::ConfigurationInvalid,
            ErrorKind::Serialization => ErrorCode::SerializationFailed,
            ErrorKind::Cache => ErrorCode::CacheFailure,
            ErrorKind::Internal => ErrorCode::InternalError,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self.kind() {
            ErrorKind::Timeout | ErrorKind::Connection | ErrorKind::RateLimited => {
                ErrorSeverity::Warning
            }
            ErrorKind::CircuitOpen => ErrorSeverity::Warning,
            ErrorKind::NotFound | ErrorKind::Validation => ErrorSeverity::Info,
            ErrorKind::RecoveryFailed | ErrorKind::Config => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for RegistryError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(format!("I/O error: {err}"))
    }
}

/// Error logging and reporting utilities
pub struct ErrorReporter;

impl ErrorReporter {
    /// Log an error with a level chosen by its severity
    pub fn log_error(error: &RegistryError, component: &str, operation: &str) {
        let code = error.to_error_code();
        let stages = error.stages();

        match error.severity() {
            ErrorSeverity::Critical => {
                tracing::error!(
                    error_code = code.as_number(),
                    category = code.category(),
                    component,
                    operation,
                    stages = ?stages,
                    "Critical error occurred: {}",
                    error
                );
            }
            ErrorSeverity::Error => {
                tracing::error!(
                    error_code = code.as_number(),
                    category = code.category(),
                    component,
                    operation,
                    "Error occurred: {}",
                    error
                );
            }
            ErrorSeverity::Warning => {
                tracing::warn!(
                    error_code = code.as_number(),
                    category = code.category(),
                    component,
                    operation,
                    "Warning: {}",
                    error
                );
            }
            ErrorSeverity::Info => {
                tracing::info!(
                    error_code = code.as_number(),
                    category = code.category(),
                    component,
                    operation,
                    "Info: {}",
                    error
                );
            }
        }
    }

    /// Generate error fields for an external dashboard
    pub fn generate_metrics(error: &RegistryError) -> HashMap<String, serde_json::Value> {
        let code = error.to_error_code();

        HashMap::from([
            (
                "error_code".to_string(),
                serde_json::Value::Number(code.as_number().into()),
            ),
            (
                "category".to_string(),
                serde_json::Value::String(code.category().to_string()),
            ),
            (
                "severity".to_string(),
                serde_json::Value::String(format!("{:?}", error.severity())),
            ),
            (
                "retryable".to_string(),
                serde_json::Value::Bool(error.is_retryable()),
            ),
            (
                "stages".to_string(),
                serde_json::to_value(error.stages()).unwrap_or_default(),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(RegistryError::timeout("t").kind(), ErrorKind::Timeout);
        assert_eq!(
            RegistryError::server_error(503, "unavailable").kind(),
            ErrorKind::ServerError
        );
        assert_eq!(RegistryError::not_found("x").kind(), ErrorKind::NotFound);
        assert!(RegistryError::rate_limited("429").is_retryable());
        assert!(!RegistryError::validation("bad").is_retryable());
    }

    #[test]
    fn test_root_cause_unwraps_provenance() {
        let original = RegistryError::connection("reset by peer");
        let wrapped = RegistryError::RecoveryFailed {
            source: Box::new(original),
            stages: vec![PipelineStage::Retry, PipelineStage::Fallback],
        };

        assert_eq!(wrapped.kind(), ErrorKind::RecoveryFailed);
        assert_eq!(wrapped.root_cause().kind(), ErrorKind::Connection);
        assert_eq!(
            wrapped.stages(),
            &[PipelineStage::Retry, PipelineStage::Fallback]
        );
        assert!(wrapped.to_string().contains("reset by peer"));
    }

    #[test]
    fn test_error_codes_and_metrics() {
        let error = RegistryError::rate_limited("Too many requests");
        assert_eq!(error.to_error_code().as_number(), 1501);
        assert_eq!(error.to_error_code().category(), "admission");

        let metrics = ErrorReporter::generate_metrics(&error);
        assert_eq!(metrics["error_code"].as_u64(), Some(1501));
        assert_eq!(metrics["retryable"].as_bool(), Some(true));
        assert_eq!(metrics["severity"].as_str(), Some("Warning"));
    }
}

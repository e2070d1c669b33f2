//! Error types for addonkit.
//!
//! `AddonkitError` covers failures of the machinery itself: IO, network,
//! persistence, configuration and queue lifecycle. Expected per-definition
//! outcomes of package operations live in [`crate::results`] and are returned
//! by value instead.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A single configuration field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Path to the offending field, outermost key first.
    pub path: Vec<String>,
    pub message: String,
}

impl FieldError {
    pub fn new(path: &[&str], message: impl Into<String>) -> Self {
        Self {
            path: path.iter().map(|p| p.to_string()).collect(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.join("."), self.message)
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Main error type for the addonkit library.
#[derive(Debug, Error)]
pub enum AddonkitError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Rate limited by {service}, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        service: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Download failed for {url}: {message}")]
    DownloadFailed { url: String, message: String },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Archive error: {message}")]
    Archive { message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Invalid configuration: {}", join_field_errors(.errors))]
    ConfigValidation { errors: Vec<FieldError> },

    #[error("Profile not found: {profile}")]
    ProfileNotFound { profile: String },

    // Queue and coordination errors
    #[error("Work queue is closed")]
    QueueClosed,

    #[error("Operation failed unexpectedly: {message}")]
    OperationPanicked { message: String },

    #[error("Device authorization failed: {message}")]
    AuthFailed { message: String },

    // Request errors
    #[error("Invalid parameters: {message}")]
    InvalidParams { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for addonkit operations.
pub type Result<T> = std::result::Result<T, AddonkitError>;

// Conversion implementations for common error types

impl From<std::io::Error> for AddonkitError {
    fn from(err: std::io::Error) -> Self {
        AddonkitError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for AddonkitError {
    fn from(err: serde_json::Error) -> Self {
        AddonkitError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for AddonkitError {
    fn from(err: rusqlite::Error) -> Self {
        AddonkitError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for AddonkitError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AddonkitError::Timeout(std::time::Duration::from_secs(0))
        } else {
            AddonkitError::Network {
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

impl From<zip::result::ZipError> for AddonkitError {
    fn from(err: zip::result::ZipError) -> Self {
        AddonkitError::Archive {
            message: err.to_string(),
        }
    }
}

impl AddonkitError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        AddonkitError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Shorthand for a configuration error on a single field.
    pub fn invalid_field(path: &[&str], message: impl Into<String>) -> Self {
        AddonkitError::ConfigValidation {
            errors: vec![FieldError::new(path, message)],
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32000: Network/connectivity error
    /// - -32001: Configuration validation error
    /// - -32002: Profile not found
    /// - -32003: Device authorization failed
    /// - -32004: Work queue closed
    /// - -32602: Invalid params
    /// - -32603: Internal error
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            AddonkitError::Network { .. }
            | AddonkitError::Timeout(_)
            | AddonkitError::RateLimited { .. }
            | AddonkitError::DownloadFailed { .. } => -32000,

            AddonkitError::ConfigValidation { .. } => -32001,

            AddonkitError::ProfileNotFound { .. } => -32002,

            AddonkitError::AuthFailed { .. } => -32003,

            AddonkitError::QueueClosed => -32004,

            AddonkitError::InvalidParams { .. } => -32602,

            _ => -32603,
        }
    }

    /// Structured payload attached to RPC errors, if any.
    pub fn rpc_error_data(&self) -> Option<serde_json::Value> {
        match self {
            AddonkitError::ConfigValidation { errors } => serde_json::to_value(errors).ok(),
            _ => None,
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AddonkitError::Network { .. }
                | AddonkitError::Timeout(_)
                | AddonkitError::RateLimited { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AddonkitError::ProfileNotFound {
            profile: "__default__".into(),
        };
        assert_eq!(err.to_string(), "Profile not found: __default__");
    }

    #[test]
    fn test_config_validation_display() {
        let err = AddonkitError::ConfigValidation {
            errors: vec![
                FieldError::new(&["addon_dir"], "not a writable directory"),
                FieldError::new(&["access_tokens", "github"], "must not be empty"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Invalid configuration: addon_dir: not a writable directory; \
             access_tokens.github: must not be empty"
        );
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(
            AddonkitError::invalid_field(&["profile"], "empty").to_rpc_error_code(),
            -32001
        );
        assert_eq!(AddonkitError::QueueClosed.to_rpc_error_code(), -32004);
        assert_eq!(
            AddonkitError::Other("boom".into()).to_rpc_error_code(),
            -32603
        );
    }

    #[test]
    fn test_rpc_error_data_only_for_validation() {
        let data = AddonkitError::invalid_field(&["addon_dir"], "missing")
            .rpc_error_data()
            .unwrap();
        assert_eq!(data[0]["path"][0], "addon_dir");
        assert!(AddonkitError::QueueClosed.rpc_error_data().is_none());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(AddonkitError::Timeout(std::time::Duration::from_secs(5)).is_retryable());
        assert!(!AddonkitError::QueueClosed.is_retryable());
    }
}

//! # Stillpoint Common
//!
//! Shared error types and logging configuration for the Stillpoint offline
//! worker crates.
//!
//! ## Features
//!
//! - Unified error type with backtrace support for internal faults
//! - Logging configuration and setup
//! - Result extension traits

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, try_init_logging, LogConfig, LogFormat};

/// Unified error type for the offline worker engine.
///
/// Individual crates define their own narrow error enums; this type is the
/// boundary representation used when a handler catches and logs a failure.
#[derive(Error, Debug)]
pub enum StillpointError {
    /// Network-related errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Cache store errors.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Persistent state store errors.
    #[error("Store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Worker lifecycle errors (install/activate).
    #[error("Lifecycle error: {message}")]
    Lifecycle {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Notification display errors.
    #[error("Notification error: {message}")]
    Notification {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        backtrace: Option<backtrace::Backtrace>,
    },
}

impl StillpointError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            source: None,
        }
    }

    /// Create a cache error with source.
    pub fn cache_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Cache {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            source: None,
        }
    }

    /// Create a store error with source.
    pub fn store_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a lifecycle error.
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle {
            message: message.into(),
            source: None,
        }
    }

    /// Create a lifecycle error with source.
    pub fn lifecycle_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Lifecycle {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a notification error.
    pub fn notification(message: impl Into<String>) -> Self {
        Self::Notification {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error with backtrace.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            backtrace: Some(backtrace::Backtrace::new()),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StillpointError::Network { .. })
    }

    /// Get the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            StillpointError::Network { .. } => "network",
            StillpointError::Cache { .. } => "cache",
            StillpointError::Store { .. } => "store",
            StillpointError::Lifecycle { .. } => "lifecycle",
            StillpointError::Notification { .. } => "notification",
            StillpointError::NotFound(_) => "not_found",
            StillpointError::InvalidArgument(_) => "invalid_argument",
            StillpointError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for worker operations.
pub type Result<T> = std::result::Result<T, StillpointError>;

/// Extension trait for Result.
pub trait ResultExt<T> {
    /// Add context to an error, converting it to the unified type.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| StillpointError::Internal {
            message: format!("{}: {}", message.into(), e),
            backtrace: Some(backtrace::Backtrace::new()),
        })
    }
}

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| StillpointError::NotFound(resource.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(StillpointError::network("test").category(), "network");
        assert_eq!(StillpointError::cache("test").category(), "cache");
        assert_eq!(StillpointError::lifecycle("test").category(), "lifecycle");
        assert_eq!(
            StillpointError::NotFound("x".into()).category(),
            "not_found"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(StillpointError::network("test").is_retryable());
        assert!(!StillpointError::cache("test").is_retryable());
        assert!(!StillpointError::internal("test").is_retryable());
    }

    #[test]
    fn test_error_source_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = StillpointError::store_with_source("flush failed", io);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let err = result.context("writing state").unwrap_err();
        assert!(err.to_string().contains("writing state"));
    }

    #[test]
    fn test_option_ext() {
        let some: Option<i32> = Some(42);
        assert_eq!(some.ok_or_not_found("test").unwrap(), 42);

        let none: Option<i32> = None;
        assert!(matches!(
            none.ok_or_not_found("test"),
            Err(StillpointError::NotFound(_))
        ));
    }
}

//! # swkit Common
//!
//! Common utilities, error types, logging and configuration shared by the
//! swkit crates.
//!
//! ## Features
//!
//! - Unified error type with backtrace support
//! - Logging configuration and setup
//! - JSON configuration for the observer and logging
//! - Result and Option extension traits

use std::time::Duration;
use thiserror::Error;

pub mod config;
pub mod logging;

pub use config::{LoggingSettings, ObserverConfig, SwKitConfig};
pub use logging::{init_logging, LogConfig, LogFormat};

/// Unified error type for swkit.
#[derive(Error, Debug)]
pub enum SwKitError {
    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Timeout errors.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Cancelled operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        backtrace: Option<backtrace::Backtrace>,
    },
}

impl SwKitError {
    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an internal error with backtrace.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            backtrace: Some(backtrace::Backtrace::new()),
        }
    }

    /// Get the error category for diagnostics.
    pub fn category(&self) -> &'static str {
        match self {
            SwKitError::Config { .. } => "config",
            SwKitError::Io(_) => "io",
            SwKitError::Json(_) => "json",
            SwKitError::Timeout(_) => "timeout",
            SwKitError::Cancelled => "cancelled",
            SwKitError::NotFound(_) => "not_found",
            SwKitError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for swkit operations.
pub type Result<T> = std::result::Result<T, SwKitError>;

/// Extension trait for Result.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| SwKitError::Internal {
            message: format!("{}: {}", message.into(), e),
            backtrace: Some(backtrace::Backtrace::new()),
        })
    }
}

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Turn `None` into [`SwKitError::NotFound`].
    fn ok_or_not_found(self, what: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, what: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| SwKitError::NotFound(what.into()))
    }
}

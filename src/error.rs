//! Error types for the log source
//!
//! This module defines the error hierarchy for the whole crate.
//! All public APIs return `Result<T, Error>` where Error is defined here.

use thiserror::Error;

/// The main error type for the log source
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid topic pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    // ============================================================================
    // Discovery Errors
    // ============================================================================
    #[error("Partition discovery failed: {message}")]
    Discovery { message: String },

    #[error("Partition discovery failed after {attempts} attempts: {message}")]
    DiscoveryExhausted { attempts: u32, message: String },

    // ============================================================================
    // Broker Errors
    // ============================================================================
    #[error("Transient broker error: {message}")]
    Transient { message: String },

    #[error("Broker request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Poll failed for {topic}-{partition} at offset {offset}: {message}")]
    Poll {
        topic: String,
        partition: i32,
        offset: i64,
        message: String,
    },

    #[error("Offset commit failed: {message}")]
    Commit { message: String },

    // ============================================================================
    // State Errors
    // ============================================================================
    #[error("Corrupt snapshot state: {message}")]
    CorruptState { message: String },

    #[error("Unsupported snapshot format version {version} (newest supported is {supported})")]
    UnsupportedVersion { version: u32, supported: u32 },

    #[error("Cannot {operation} while connector is {state}")]
    InvalidState { operation: String, state: String },

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid config value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a discovery error
    pub fn discovery(message: impl Into<String>) -> Self {
        Self::Discovery {
            message: message.into(),
        }
    }

    /// Create a transient broker error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Create a fatal poll error with partition context
    pub fn poll(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        message: impl Into<String>,
    ) -> Self {
        Self::Poll {
            topic: topic.into(),
            partition,
            offset,
            message: message.into(),
        }
    }

    /// Create a commit error
    pub fn commit(message: impl Into<String>) -> Self {
        Self::Commit {
            message: message.into(),
        }
    }

    /// Create a corrupt state error
    pub fn corrupt_state(message: impl Into<String>) -> Self {
        Self::CorruptState {
            message: message.into(),
        }
    }

    /// Create an invalid lifecycle state error
    pub fn invalid_state(operation: impl Into<String>, state: impl ToString) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Retryable errors are recovered inside the component that hit them.
    /// Everything else fails the task.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transient { .. } | Error::Timeout { .. } | Error::Discovery { .. }
        )
    }
}

/// Result type alias for the log source
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", message.into(), inner))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", f(), inner))
        })
    }
}

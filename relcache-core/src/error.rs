//! Error types for relcache operations
//!
//! Absence is not an error: lookups of unknown keys, or of keys stored under
//! another kind, return `None`. The variants below cover configuration
//! problems and the background threads that carry writes and notifications.

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Errors raised by the cache's background machinery.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Failed to spawn thread {name}: {reason}")]
    ThreadSpawn { name: String, reason: String },

    #[error("Write queue closed: the writer thread has stopped")]
    WriterStopped,

    #[error("Notification queue closed: the notifier thread has stopped")]
    NotifierStopped,

    #[error("flush() called from an observer callback would wait on itself")]
    FlushFromObserver,
}

/// Master error type for all relcache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelCacheError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Result type alias for relcache operations.
pub type RelCacheResult<T> = Result<T, RelCacheError>;

// =============================================================================
// TESTS
// =============================================================================

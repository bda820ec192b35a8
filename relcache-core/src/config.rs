//! Configuration types

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, RelCacheResult};

/// Environment variable overriding [`CacheConfig::writer_thread_name`].
pub const ENV_WRITER_THREAD: &str = "RELCACHE_WRITER_THREAD";
/// Environment variable overriding [`CacheConfig::notifier_thread_name`].
pub const ENV_NOTIFIER_THREAD: &str = "RELCACHE_NOTIFIER_THREAD";
/// Environment variable overriding [`CacheConfig::isolate_observer_panics`].
pub const ENV_ISOLATE_OBSERVER_PANICS: &str = "RELCACHE_ISOLATE_OBSERVER_PANICS";

/// Configuration for a cache instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Name of the thread that applies queued writes.
    pub writer_thread_name: String,
    /// Name of the thread that invokes observer callbacks.
    pub notifier_thread_name: String,
    /// Catch panics raised by observer callbacks and keep delivering.
    ///
    /// When disabled, a panicking callback stops the notifier thread and
    /// every later notification is dropped.
    pub isolate_observer_panics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            writer_thread_name: "relcache-writer".to_string(),
            notifier_thread_name: "relcache-notifier".to_string(),
            isolate_observer_panics: true,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the writer thread name.
    pub fn with_writer_thread_name(mut self, name: impl Into<String>) -> Self {
        self.writer_thread_name = name.into();
        self
    }

    /// Set the notifier thread name.
    pub fn with_notifier_thread_name(mut self, name: impl Into<String>) -> Self {
        self.notifier_thread_name = name.into();
        self
    }

    /// Enable or disable observer panic isolation.
    pub fn with_isolate_observer_panics(mut self, enabled: bool) -> Self {
        self.isolate_observer_panics = enabled;
        self
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `RELCACHE_WRITER_THREAD`: writer thread name (default: relcache-writer)
    /// - `RELCACHE_NOTIFIER_THREAD`: notifier thread name (default: relcache-notifier)
    /// - `RELCACHE_ISOLATE_OBSERVER_PANICS`: `true`/`false` (default: true)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    ///
    /// Unparseable values fall back to the default for that field.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            writer_thread_name: lookup(ENV_WRITER_THREAD).unwrap_or(defaults.writer_thread_name),
            notifier_thread_name: lookup(ENV_NOTIFIER_THREAD)
                .unwrap_or(defaults.notifier_thread_name),
            isolate_observer_panics: lookup(ENV_ISOLATE_OBSERVER_PANICS)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.isolate_observer_panics),
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - thread names are non-empty
    /// - thread names contain no NUL byte (the OS rejects them)
    pub fn validate(&self) -> RelCacheResult<()> {
        validate_thread_name("writer_thread_name", &self.writer_thread_name)?;
        validate_thread_name("notifier_thread_name", &self.notifier_thread_name)?;
        Ok(())
    }
}

fn validate_thread_name(field: &str, value: &str) -> RelCacheResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: format!("{} must not be empty", field),
        }
        .into());
    }
    if value.contains('\0') {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.escape_default().to_string(),
            reason: format!("{} must not contain NUL bytes", field),
        }
        .into());
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

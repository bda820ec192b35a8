//! relcache Core - Keys and Value Contracts
//!
//! Pure data types shared by every relcache crate. This crate contains the
//! identity model, the capability traits a value kind implements to be
//! admitted into the cache, the error taxonomy and the configuration type.
//! The engine itself lives in `relcache-store`.

pub mod config;
pub mod entity;
pub mod error;
pub mod key;

pub use config::CacheConfig;
pub use entity::{Identifiable, Mergeable};
pub use error::{ConfigError, RelCacheError, RelCacheResult, RuntimeError};
pub use key::Key;

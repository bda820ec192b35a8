//! relcache Store - Relationship-Aware Object Cache
//!
//! An in-memory cache for heterogeneous immutable values. Each value is
//! stored under a [`Key`](relcache_core::Key) and may declare the keys it
//! depends on. Observers registered on a key hear about writes to that key
//! and to anything it transitively depends on.
//!
//! ```no_run
//! use std::sync::Arc;
//! use relcache_core::{Identifiable, Key};
//! use relcache_store::RelCache;
//!
//! #[derive(Clone)]
//! struct User { id: u64, name: String }
//!
//! impl Identifiable for User {
//!     type Id = u64;
//!     fn id(&self) -> u64 { self.id }
//! }
//!
//! let cache = Arc::new(RelCache::with_defaults()?);
//! let _handle = cache.observe::<User, _>(&7, |user| println!("now {}", user.name));
//! cache.set(User { id: 7, name: "Ada".into() })?;
//! cache.flush()?;
//! assert!(cache.contains(&Key::of::<User>(&7)));
//! # Ok::<(), relcache_core::RelCacheError>(())
//! ```
//!
//! Admission ordering is internal; only the cache itself holds tickets.
//!
//! ```compile_fail
//! use relcache_store::gate::FifoGate;
//! ```

#![forbid(unsafe_code)]

mod cache;
mod gate;
mod live;
mod notify;
mod propagation;
mod prune;
mod registry;
mod stats;
mod store;
mod transaction;

pub use cache::RelCache;
pub use live::LiveValue;
pub use prune::PruneReport;
pub use registry::ObservationHandle;
pub use stats::CacheStats;
pub use transaction::Transaction;

pub use relcache_core::{
    CacheConfig, ConfigError, Identifiable, Key, Mergeable, RelCacheError, RelCacheResult,
    RuntimeError,
};

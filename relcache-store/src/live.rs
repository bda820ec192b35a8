//! Live cells.
//!
//! A [`LiveValue`] names one cached value and reads it through the cache on
//! demand. It holds only a weak reference to the cache, so it never keeps
//! the cache alive and never keeps its value from being pruned.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use relcache_core::{Identifiable, Key};

use crate::cache::RelCache;
use crate::registry::ObservationHandle;

/// Handle to the current value of one key.
pub struct LiveValue<T> {
    key: Key,
    cache: Weak<RelCache>,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Identifiable> LiveValue<T> {
    pub(crate) fn new(cache: &Arc<RelCache>, key: Key) -> Self {
        Self {
            key,
            cache: Arc::downgrade(cache),
            _kind: PhantomData,
        }
    }

    /// The key this cell reads.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Whether the cache is still alive.
    pub fn is_attached(&self) -> bool {
        self.cache.strong_count() > 0
    }

    /// The value currently stored, or `None` when nothing is stored or the
    /// cache has been dropped.
    pub fn get(&self) -> Option<T> {
        self.cache.upgrade()?.get_by_key::<T>(&self.key)
    }

    /// Subscribe to changes of this cell.
    ///
    /// Returns `None` when the cache has been dropped.
    pub fn observe<F>(&self, callback: F) -> Option<ObservationHandle>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let cache = self.cache.upgrade()?;
        Some(cache.observe_key::<T, F>(self.key.clone(), callback))
    }
}

impl<T> Clone for LiveValue<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            cache: Weak::clone(&self.cache),
            _kind: PhantomData,
        }
    }
}

impl<T> fmt::Debug for LiveValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveValue")
            .field("key", &self.key)
            .field("attached", &(self.cache.strong_count() > 0))
            .finish()
    }
}

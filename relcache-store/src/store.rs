//! Value store, relationship store and the write path.
//!
//! [`CacheState`] is everything the gate protects: the type-erased values,
//! the relationship edges derived from them and the observer registry.
//! Every method here assumes the caller already holds the right kind of
//! gate access; none of them lock anything.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use relcache_core::{Identifiable, Key};
use tracing::debug;

use crate::registry::ObserverRegistry;

/// A stored value with its concrete type erased.
///
/// Values are immutable once stored; readers and in-flight notifications
/// share them through the `Arc`.
pub(crate) type StoredValue = Arc<dyn Any + Send + Sync>;

// ============================================================================
// VALUE STORE
// ============================================================================

/// Mapping from key to the latest value written for it.
#[derive(Default)]
pub(crate) struct ValueStore {
    entries: HashMap<Key, StoredValue>,
}

impl ValueStore {
    /// Typed lookup. A value stored under `key` with a different concrete
    /// type reads as absent.
    pub fn get<T: Identifiable>(&self, key: &Key) -> Option<&T> {
        self.entries.get(key)?.downcast_ref::<T>()
    }

    pub fn get_erased(&self, key: &Key) -> Option<&StoredValue> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: Key, value: StoredValue) {
        self.entries.insert(key, value);
    }

    pub fn remove(&mut self, key: &Key) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Remove every entry, returning the keys that were present.
    pub fn drain_keys(&mut self) -> Vec<Key> {
        self.entries.drain().map(|(key, _)| key).collect()
    }
}

// ============================================================================
// RELATIONSHIP STORE
// ============================================================================

/// Directed dependency edges between keys.
///
/// `edges[k]` is the set of keys `k` depends on; `dependents` is the
/// reverse index maintained alongside it, so ancestor searches do not have
/// to scan every edge set. A key with no outgoing edges has no entry.
#[derive(Default)]
pub(crate) struct RelationshipStore {
    edges: HashMap<Key, HashSet<Key>>,
    dependents: HashMap<Key, HashSet<Key>>,
}

impl RelationshipStore {
    /// Replace the full edge set of `from`.
    pub fn replace(&mut self, from: &Key, to: impl IntoIterator<Item = Key>) {
        self.remove(from);
        let targets: HashSet<Key> = to.into_iter().collect();
        if targets.is_empty() {
            return;
        }
        for target in &targets {
            self.dependents
                .entry(target.clone())
                .or_default()
                .insert(from.clone());
        }
        self.edges.insert(from.clone(), targets);
    }

    /// Drop every outgoing edge of `from`.
    pub fn remove(&mut self, from: &Key) {
        let Some(old) = self.edges.remove(from) else {
            return;
        };
        for target in old {
            if let Some(set) = self.dependents.get_mut(&target) {
                set.remove(from);
                if set.is_empty() {
                    self.dependents.remove(&target);
                }
            }
        }
    }

    /// Keys `from` directly depends on.
    pub fn edges(&self, from: &Key) -> Option<&HashSet<Key>> {
        self.edges.get(from)
    }

    /// Keys that directly depend on `to`.
    pub fn dependents(&self, to: &Key) -> Option<&HashSet<Key>> {
        self.dependents.get(to)
    }

    pub fn sources(&self) -> impl Iterator<Item = &Key> {
        self.edges.keys()
    }

    /// Total number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(HashSet::len).sum()
    }

    pub fn clear(&mut self) {
        self.edges.clear();
        self.dependents.clear();
    }
}

// ============================================================================
// CACHE STATE
// ============================================================================

/// Everything guarded by the cache's gate.
#[derive(Default)]
pub(crate) struct CacheState {
    pub values: ValueStore,
    pub relationships: RelationshipStore,
    pub registry: ObserverRegistry,
}

impl CacheState {
    pub fn get<T: Identifiable>(&self, key: &Key) -> Option<&T> {
        self.values.get(key)
    }

    /// Write `value` under its key.
    ///
    /// When a record of kind `T` is already stored, the result of
    /// [`Identifiable::merge`] is stored instead: a replacement for plain
    /// kinds, a field-wise merge for mergeable ones.
    pub fn set<T: Identifiable>(&mut self, value: T) -> Key {
        let key = value.key();
        match self.values.get::<T>(&key) {
            Some(current) => {
                let merged = current.merge(value);
                self.store(key.clone(), merged, true);
            }
            None => self.store(key.clone(), value, false),
        }
        key
    }

    /// Clear values and relationships. Observer registrations stay.
    pub fn remove_all(&mut self) -> Vec<Key> {
        self.relationships.clear();
        let removed = self.values.drain_keys();
        debug!(removed = removed.len(), "cleared cache contents");
        removed
    }

    fn store<T: Identifiable>(&mut self, key: Key, value: T, existing: bool) {
        let related = value.related_keys();
        let edge_count = related.len();
        self.relationships.replace(&key, related);
        self.values.insert(key.clone(), Arc::new(value));
        debug!(%key, existing, edges = edge_count, "applied write");
    }
}

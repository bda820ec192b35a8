//! Observer registry and disposal handles.
//!
//! The registry holds only [`Weak`] references to observer entries; the
//! caller's [`ObservationHandle`] is the sole strong owner. Releasing the
//! handle (dropping it, or calling [`ObservationHandle::dispose`]) clears
//! the entry's active flag and lets the `Arc` go. Dead slots are skipped at
//! lookup. They are swept for the registered key on every registration, for
//! every key once the number of watched keys doubles, and during pruning.
//!
//! # Invariants
//!
//! 1. Registry membership never keeps an observer alive.
//! 2. A disposed observer is never invoked by a notification pass that
//!    starts after the disposal, even if a delivery for it is already
//!    queued.
//! 3. Releasing a handle never blocks: it touches an atomic flag and a
//!    reference count, never the gate.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use relcache_core::{Identifiable, Key};

/// Type-erased observer callback.
type ErasedCallback = Box<dyn Fn(&(dyn Any + Send + Sync)) + Send + Sync>;

/// One registration: a watched key and the callback to run for it.
pub(crate) struct ObserverEntry {
    key: Key,
    active: AtomicBool,
    callback: ErasedCallback,
}

impl ObserverEntry {
    /// Wrap a typed callback. Values of any other concrete type are ignored.
    pub fn typed<T, F>(key: Key, callback: F) -> Self
    where
        T: Identifiable,
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self {
            key,
            active: AtomicBool::new(true),
            callback: Box::new(move |value| {
                if let Some(typed) = value.downcast_ref::<T>() {
                    callback(typed);
                }
            }),
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Run the callback unless the entry was disposed. Returns whether it ran.
    pub fn invoke(&self, value: &(dyn Any + Send + Sync)) -> bool {
        if !self.is_active() {
            return false;
        }
        (self.callback)(value);
        true
    }
}

impl fmt::Debug for ObserverEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverEntry")
            .field("key", &self.key)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Owner of one observation. Releasing it ends the observation.
///
/// Dropping the handle is equivalent to calling [`dispose`](Self::dispose).
#[must_use = "dropping the handle immediately ends the observation"]
#[derive(Debug)]
pub struct ObservationHandle {
    entry: Arc<ObserverEntry>,
}

impl ObservationHandle {
    pub(crate) fn new(entry: Arc<ObserverEntry>) -> Self {
        Self { entry }
    }

    /// The key being observed.
    pub fn key(&self) -> &Key {
        self.entry.key()
    }

    /// Whether the observation is still live.
    pub fn is_active(&self) -> bool {
        self.entry.is_active()
    }

    /// End the observation now. Idempotent.
    pub fn dispose(&self) {
        self.entry.deactivate();
    }
}

impl Drop for ObservationHandle {
    fn drop(&mut self) {
        self.entry.deactivate();
    }
}

/// Number of watched keys below which registration never runs a full sweep.
const MIN_SWEEP_KEYS: usize = 64;

/// Weakly-held observer entries, grouped by watched key.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    slots: HashMap<Key, Vec<Weak<ObserverEntry>>>,
    /// Key count at which the next registration sweeps every key.
    sweep_at: usize,
}

impl ObserverRegistry {
    /// Add an entry. Dead slots for the same key are swept first, and all
    /// keys are swept once the key count reaches the sweep threshold.
    pub fn register(&mut self, entry: &Arc<ObserverEntry>) {
        let slots = self.slots.entry(entry.key().clone()).or_default();
        slots.retain(is_live);
        slots.push(Arc::downgrade(entry));

        if self.slots.len() >= self.sweep_at.max(MIN_SWEEP_KEYS) {
            self.purge();
        }
    }

    /// Live entries watching `key`, in registration order.
    pub fn live_for(&self, key: &Key) -> Vec<Arc<ObserverEntry>> {
        self.slots
            .get(key)
            .map(|slots| {
                slots
                    .iter()
                    .filter_map(Weak::upgrade)
                    .filter(|entry| entry.is_active())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Keys with at least one live observer.
    pub fn observed_keys(&self) -> HashSet<Key> {
        self.slots
            .iter()
            .filter(|(_, slots)| slots.iter().any(is_live))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of live observers across all keys.
    pub fn live_count(&self) -> usize {
        self.slots
            .values()
            .flat_map(|slots| slots.iter())
            .filter(|slot| is_live(slot))
            .count()
    }

    /// Drop disposed slots and empty keys. Returns the number of slots removed.
    pub fn purge(&mut self) -> usize {
        let mut removed = 0;
        self.slots.retain(|_, slots| {
            let before = slots.len();
            slots.retain(is_live);
            removed += before - slots.len();
            !slots.is_empty()
        });
        self.sweep_at = self.slots.len().saturating_mul(2);
        removed
    }

    #[cfg(test)]
    fn key_count(&self) -> usize {
        self.slots.len()
    }
}

fn is_live(slot: &Weak<ObserverEntry>) -> bool {
    slot.upgrade().is_some_and(|entry| entry.is_active())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relcache_test_utils::Tag;
    use std::sync::atomic::AtomicUsize;

    fn counting_entry(key: &Key, hits: &Arc<AtomicUsize>) -> Arc<ObserverEntry> {
        let hits = Arc::clone(hits);
        Arc::new(ObserverEntry::typed::<Tag, _>(key.clone(), move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ObserverRegistry::default();
        let key = Key::of::<Tag>(&"rust".to_string());
        let hits = Arc::new(AtomicUsize::new(0));
        let entry = counting_entry(&key, &hits);
        let _handle = ObservationHandle::new(Arc::clone(&entry));
        registry.register(&entry);
        drop(entry);

        assert_eq!(registry.live_for(&key).len(), 1);
        assert_eq!(registry.live_count(), 1);
        assert!(registry.observed_keys().contains(&key));
    }

    #[test]
    fn test_registry_does_not_own_entries() {
        let mut registry = ObserverRegistry::default();
        let key = Key::of::<Tag>(&"rust".to_string());
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = ObservationHandle::new(counting_entry(&key, &hits));
        registry.register(&handle.entry);

        drop(handle);
        assert!(registry.live_for(&key).is_empty());
        assert!(registry.observed_keys().is_empty());
        assert_eq!(registry.purge(), 1);
    }

    #[test]
    fn test_dispose_blocks_invocation_of_held_entry() {
        let key = Key::of::<Tag>(&"rust".to_string());
        let hits = Arc::new(AtomicUsize::new(0));
        let entry = counting_entry(&key, &hits);
        let handle = ObservationHandle::new(Arc::clone(&entry));
        let tag = Tag::new("rust");

        assert!(entry.invoke(&tag));
        handle.dispose();
        handle.dispose();
        assert!(!entry.invoke(&tag));
        assert!(!handle.is_active());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_typed_callback_ignores_other_types() {
        let key = Key::new("shared", "1");
        let hits = Arc::new(AtomicUsize::new(0));
        let entry = counting_entry(&key, &hits);

        assert!(entry.invoke(&42u64));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_multiple_observers_same_key() {
        let mut registry = ObserverRegistry::default();
        let key = Key::of::<Tag>(&"rust".to_string());
        let hits = Arc::new(AtomicUsize::new(0));
        let h1 = ObservationHandle::new(counting_entry(&key, &hits));
        let h2 = ObservationHandle::new(counting_entry(&key, &hits));
        registry.register(&h1.entry);
        registry.register(&h2.entry);

        assert_eq!(registry.live_for(&key).len(), 2);
        drop(h1);
        assert_eq!(registry.live_for(&key).len(), 1);
        drop(h2);
        assert_eq!(registry.purge(), 2);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_disposed_keys_do_not_accumulate() {
        let mut registry = ObserverRegistry::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let kept_key = Key::of::<Tag>(&"kept".to_string());
        let kept = ObservationHandle::new(counting_entry(&kept_key, &hits));
        registry.register(&kept.entry);

        for i in 0..10_000 {
            let key = Key::of::<Tag>(&format!("t{i}"));
            let handle = ObservationHandle::new(counting_entry(&key, &hits));
            registry.register(&handle.entry);
            drop(handle);
            assert!(registry.key_count() <= MIN_SWEEP_KEYS);
        }

        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.live_for(&kept_key).len(), 1);
    }

    #[test]
    fn test_live_keys_raise_sweep_threshold() {
        let mut registry = ObserverRegistry::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..200)
            .map(|i| {
                let key = Key::of::<Tag>(&format!("t{i}"));
                let handle = ObservationHandle::new(counting_entry(&key, &hits));
                registry.register(&handle.entry);
                handle
            })
            .collect();

        assert_eq!(registry.key_count(), 200);
        assert_eq!(registry.live_count(), 200);
        drop(handles);
    }
}

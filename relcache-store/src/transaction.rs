//! Batch transactions.
//!
//! [`RelCache::perform_batch`](crate::RelCache::perform_batch) runs a
//! closure against a [`Transaction`]: a restricted view of the live store
//! valid for exactly one exclusive section. Reads inside the closure see
//! every write made earlier in the same closure. Observers hear nothing
//! until the closure returns, then each affected observer is notified once
//! with its final value.
//!
//! # Failure Modes
//!
//! - **Closure panics**: the exclusive section is released while
//!   unwinding and no notifications are sent. Writes made before the panic
//!   stay applied. There is no rollback.
//! - **Re-entering the cache**: calling a blocking `RelCache` method (for
//!   example `get` or another `perform_batch`) from inside the closure
//!   panics with a re-entrancy message; the gate is not re-entrant.
//!
//! The handle cannot outlive the closure: its lifetime is tied to the
//! borrow the closure receives, so use-after-return does not compile.

use std::collections::HashSet;

use relcache_core::{Identifiable, Key, Mergeable};

use crate::store::CacheState;

/// Restricted store handle passed to a batch closure.
///
/// Exposes reads, writes and clearing. Registration and pruning are
/// deliberately absent.
pub struct Transaction<'a> {
    state: &'a mut CacheState,
    touched: HashSet<Key>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(state: &'a mut CacheState) -> Self {
        Self {
            state,
            touched: HashSet::new(),
        }
    }

    /// Typed point lookup.
    pub fn get<T: Identifiable>(&self, id: &T::Id) -> Option<T> {
        self.get_by_key(&Key::of::<T>(id))
    }

    /// Typed lookup by full key.
    pub fn get_by_key<T: Identifiable>(&self, key: &Key) -> Option<T> {
        self.state.get::<T>(key).cloned()
    }

    /// Whether any value is stored under `key`.
    pub fn contains(&self, key: &Key) -> bool {
        self.state.values.contains(key)
    }

    /// Insert, or write over the stored record through [`Identifiable::merge`].
    pub fn set<T: Identifiable>(&mut self, value: T) {
        let key = self.state.set(value);
        self.touched.insert(key);
    }

    /// Same as [`Transaction::set`], restricted to mergeable kinds.
    pub fn set_merged<T: Mergeable>(&mut self, value: T) {
        self.set(value);
    }

    /// Clear every value and relationship edge.
    pub fn remove_all(&mut self) {
        let removed = self.state.remove_all();
        self.touched.extend(removed);
    }

    /// Keys written or cleared so far in this transaction.
    pub fn touched_keys(&self) -> impl Iterator<Item = &Key> {
        self.touched.iter()
    }

    pub(crate) fn into_touched(self) -> HashSet<Key> {
        self.touched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relcache_test_utils::{Author, Tag};

    #[test]
    fn test_reads_see_earlier_writes() {
        let mut state = CacheState::default();
        let mut tx = Transaction::new(&mut state);

        assert!(tx.get::<Author>(&"a1".to_string()).is_none());
        tx.set(Author::named("a1", "Ada"));
        tx.set_merged(Author::partial("a1").with_email("ada@example.com"));

        let author = tx.get::<Author>(&"a1".to_string()).expect("author visible");
        assert_eq!(author.name.as_deref(), Some("Ada"));
        assert_eq!(author.email.as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn test_touched_set_accumulates() {
        let mut state = CacheState::default();
        state.set(Tag::new("old"));

        let mut tx = Transaction::new(&mut state);
        tx.set(Tag::new("a"));
        tx.set(Tag::new("a"));
        tx.set(Tag::new("b"));
        assert_eq!(tx.touched_keys().count(), 2);

        tx.remove_all();
        let touched = tx.into_touched();
        assert_eq!(touched.len(), 3);
        assert!(touched.contains(&Key::of::<Tag>(&"old".to_string())));
        assert_eq!(state.values.len(), 0);
    }

    #[test]
    fn test_contains() {
        let mut state = CacheState::default();
        let mut tx = Transaction::new(&mut state);
        let key = Key::of::<Tag>(&"x".to_string());
        assert!(!tx.contains(&key));
        tx.set(Tag::new("x"));
        assert!(tx.contains(&key));
    }
}

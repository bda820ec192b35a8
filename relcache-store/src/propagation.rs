//! Change propagation.
//!
//! Given the keys a write (or a whole batch) touched, find every key whose
//! observers must hear about it and pair each live observer with the value
//! currently stored for its watched key.
//!
//! The search runs over the reverse edges: a key is affected when it
//! declares, directly or through any chain of dependencies, a dependency on
//! a touched key. The affected set doubles as the visited set, so cycles
//! terminate after each key is visited once.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use relcache_core::Key;

use crate::registry::ObserverEntry;
use crate::store::{CacheState, RelationshipStore, StoredValue};

/// One callback invocation waiting to be delivered.
pub(crate) struct Delivery {
    pub entry: Arc<ObserverEntry>,
    pub value: StoredValue,
}

/// Expand `seeds` with every key that transitively depends on one of them.
pub(crate) fn affected_keys(
    relationships: &RelationshipStore,
    seeds: &HashSet<Key>,
) -> HashSet<Key> {
    let mut affected = seeds.clone();
    let mut frontier: VecDeque<&Key> = seeds.iter().collect();

    while let Some(key) = frontier.pop_front() {
        let Some(dependents) = relationships.dependents(key) else {
            continue;
        };
        for dependent in dependents {
            if affected.insert(dependent.clone()) {
                frontier.push_back(dependent);
            }
        }
    }

    affected
}

/// Build the deliveries for one propagation pass.
///
/// Each live observer of an affected key appears at most once. Keys with
/// no stored value are skipped rather than delivered as empty.
pub(crate) fn deliveries(state: &CacheState, affected: &HashSet<Key>) -> Vec<Delivery> {
    let mut out = Vec::new();
    for key in affected {
        let observers = state.registry.live_for(key);
        if observers.is_empty() {
            continue;
        }
        let Some(value) = state.values.get_erased(key) else {
            continue;
        };
        out.extend(observers.into_iter().map(|entry| Delivery {
            entry,
            value: Arc::clone(value),
        }));
    }
    out
}

/// Run a full pass: expand the touched set and collect deliveries.
pub(crate) fn propagate(state: &CacheState, touched: &HashSet<Key>) -> Vec<Delivery> {
    if touched.is_empty() {
        return Vec::new();
    }
    let affected = affected_keys(&state.relationships, touched);
    let out = deliveries(state, &affected);
    tracing::debug!(
        seeds = touched.len(),
        affected = affected.len(),
        deliveries = out.len(),
        "propagation pass"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ObservationHandle;
    use relcache_test_utils::{Author, Node, Post};

    fn key(id: &str) -> Key {
        Key::new("n", id)
    }

    fn set_of(keys: &[&str]) -> HashSet<Key> {
        keys.iter().map(|k| key(k)).collect()
    }

    #[test]
    fn test_affected_follows_reverse_edges() {
        let mut rels = RelationshipStore::default();
        // a -> b -> c, d -> c, e unrelated
        rels.replace(&key("a"), [key("b")]);
        rels.replace(&key("b"), [key("c")]);
        rels.replace(&key("d"), [key("c")]);
        rels.replace(&key("e"), [key("f")]);

        let affected = affected_keys(&rels, &set_of(&["c"]));
        assert_eq!(affected, set_of(&["a", "b", "c", "d"]));

        let affected = affected_keys(&rels, &set_of(&["a"]));
        assert_eq!(affected, set_of(&["a"]));
    }

    #[test]
    fn test_affected_terminates_on_cycle() {
        let mut rels = RelationshipStore::default();
        rels.replace(&key("a"), [key("b")]);
        rels.replace(&key("b"), [key("c")]);
        rels.replace(&key("c"), [key("a")]);

        let affected = affected_keys(&rels, &set_of(&["c"]));
        assert_eq!(affected, set_of(&["a", "b", "c"]));
    }

    #[test]
    fn test_self_edge() {
        let mut rels = RelationshipStore::default();
        rels.replace(&key("a"), [key("a")]);
        assert_eq!(affected_keys(&rels, &set_of(&["a"])), set_of(&["a"]));
    }

    #[test]
    fn test_deliveries_skip_absent_values() {
        let mut state = CacheState::default();
        let author_key = Key::of::<Author>(&"a1".to_string());
        let entry = Arc::new(ObserverEntry::typed::<Author, _>(author_key.clone(), |_| {}));
        let _handle = ObservationHandle::new(Arc::clone(&entry));
        state.registry.register(&entry);

        let touched: HashSet<Key> = [author_key.clone()].into_iter().collect();
        assert!(propagate(&state, &touched).is_empty());

        state.set(Author::named("a1", "Ada"));
        assert_eq!(propagate(&state, &touched).len(), 1);
    }

    #[test]
    fn test_observer_on_dependent_fires_once() {
        let mut state = CacheState::default();
        let post_key = state.set(Post::new("p1", "a1").with_tags(["t1"]));
        let author_key = state.set(Author::named("a1", "Ada"));

        let entry = Arc::new(ObserverEntry::typed::<Post, _>(post_key.clone(), |_| {}));
        let _handle = ObservationHandle::new(Arc::clone(&entry));
        state.registry.register(&entry);

        let tag_key = Key::of::<relcache_test_utils::Tag>(&"t1".to_string());
        let touched: HashSet<Key> = [author_key, tag_key].into_iter().collect();
        let out = propagate(&state, &touched);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].entry.key(), &post_key);
    }

    #[test]
    fn test_cycle_with_observer() {
        let mut state = CacheState::default();
        let a = state.set(Node::new("a", ["b"]));
        state.set(Node::new("b", ["c"]));
        let c = state.set(Node::new("c", ["a"]));

        let entry = Arc::new(ObserverEntry::typed::<Node, _>(a, |_| {}));
        let _handle = ObservationHandle::new(Arc::clone(&entry));
        state.registry.register(&entry);

        let touched: HashSet<Key> = [c].into_iter().collect();
        assert_eq!(propagate(&state, &touched).len(), 1);
    }
}

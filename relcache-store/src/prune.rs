//! Reachability-based pruning.
//!
//! Keeps every key with a live observer plus everything those keys depend
//! on at any depth (forward edges, the opposite direction from
//! propagation). Every other stored value is deleted together with its
//! edges. Dead observer slots are swept in the same pass.

use std::collections::HashSet;

use relcache_core::Key;
use tracing::info;

use crate::store::CacheState;

/// Outcome of one prune pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Values deleted.
    pub removed: usize,
    /// Values kept.
    pub retained: usize,
    /// Disposed observer slots swept from the registry.
    pub observers_purged: usize,
}

/// Keys reachable from live observations.
pub(crate) fn reachable_keys(state: &CacheState) -> HashSet<Key> {
    let mut reachable = state.registry.observed_keys();
    let mut stack: Vec<Key> = reachable.iter().cloned().collect();

    while let Some(key) = stack.pop() {
        let Some(edges) = state.relationships.edges(&key) else {
            continue;
        };
        for dep in edges {
            if reachable.insert(dep.clone()) {
                stack.push(dep.clone());
            }
        }
    }

    reachable
}

/// Delete everything unreachable from a live observation.
pub(crate) fn prune(state: &mut CacheState) -> PruneReport {
    let observers_purged = state.registry.purge();
    let reachable = reachable_keys(state);

    let doomed: HashSet<Key> = state
        .values
        .keys()
        .chain(state.relationships.sources())
        .filter(|key| !reachable.contains(*key))
        .cloned()
        .collect();

    let mut removed = 0;
    for key in &doomed {
        state.relationships.remove(key);
        if state.values.remove(key) {
            removed += 1;
        }
    }

    let report = PruneReport {
        removed,
        retained: state.values.len(),
        observers_purged,
    };
    if report.removed > 0 || report.observers_purged > 0 {
        info!(
            removed = report.removed,
            retained = report.retained,
            observers_purged = report.observers_purged,
            "prune pass"
        );
    }
    report
}

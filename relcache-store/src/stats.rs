//! Cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of lookups that found a value of the requested kind.
    pub hits: u64,
    /// Number of lookups that found nothing (or a value of another kind).
    pub misses: u64,
    /// Number of values currently stored.
    pub entry_count: u64,
    /// Number of relationship edges currently recorded.
    pub edge_count: u64,
    /// Number of live observers.
    pub observer_count: u64,
    /// Number of exclusive write sections committed (plain writes and batches).
    pub commits: u64,
    /// Number of observer callbacks invoked.
    pub notifications_delivered: u64,
    /// Number of values removed by prune passes.
    pub entries_pruned: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Monotonic counters shared between the cache and its threads.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub commits: AtomicU64,
    pub delivered: Arc<AtomicU64>,
    pub pruned: AtomicU64,
}

impl Counters {
    pub fn record_lookup(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pruned(&self, removed: usize) {
        self.pruned.fetch_add(removed as u64, Ordering::Relaxed);
    }

    /// Fill the counter-backed fields of a snapshot.
    pub fn snapshot_into(&self, stats: &mut CacheStats) {
        stats.hits = self.hits.load(Ordering::Relaxed);
        stats.misses = self.misses.load(Ordering::Relaxed);
        stats.commits = self.commits.load(Ordering::Relaxed);
        stats.notifications_delivered = self.delivered.load(Ordering::Relaxed);
        stats.entries_pruned = self.pruned.load(Ordering::Relaxed);
    }
}

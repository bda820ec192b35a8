//! The relationship-aware object cache.
//!
//! [`RelCache`] ties the pieces together: a FIFO readers/writer gate around
//! the cache state, a writer thread that applies queued writes in ticket
//! order, and a notifier thread that runs observer callbacks.
//!
//! # Ordering
//!
//! Plain writes (`set`, `set_merged`, `remove_all`) reserve their place in
//! the gate on the calling thread and return before the write is applied.
//! Any later operation from the same thread holds a later ticket, so a read
//! issued after a write always sees that write once the read returns.
//! `observe`, `perform_batch`, `prune`, `flush` and every read block until
//! admitted.
//!
//! # Notifications
//!
//! Callbacks never run inside the gate. The deliveries of each committed
//! write are queued to the notifier thread in commit order, and each
//! callback receives the value stored when that write committed. Use
//! [`RelCache::flush`] to wait for everything submitted so far to be
//! applied and delivered.

use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use relcache_core::{
    CacheConfig, Identifiable, Key, Mergeable, RelCacheResult, RuntimeError,
};
use tracing::{debug, error, info};

use crate::gate::{FifoGate, Mode, Ticket, WriteAccess};
use crate::live::LiveValue;
use crate::notify::{self, Notifier};
use crate::propagation;
use crate::prune::{self, PruneReport};
use crate::registry::{ObservationHandle, ObserverEntry};
use crate::stats::{CacheStats, Counters};
use crate::store::CacheState;
use crate::transaction::Transaction;

/// A queued mutation. Returns the keys it touched.
type WriteOp = Box<dyn FnOnce(&mut CacheState) -> HashSet<Key> + Send>;

struct WriteJob {
    ticket: Ticket,
    op: WriteOp,
}

/// State shared with the writer thread.
struct Shared {
    gate: FifoGate<CacheState>,
    notifier: Notifier,
    counters: Counters,
}

impl Shared {
    /// Propagate `touched`, queue the deliveries, then leave the section.
    fn commit(&self, access: WriteAccess<'_, CacheState>, touched: &HashSet<Key>) {
        self.counters.record_commit();
        let deliveries = propagation::propagate(&access, touched);
        if let Err(e) = self.notifier.dispatch(deliveries) {
            error!(error = %e, "dropping notifications");
        }
        drop(access);
    }
}

/// In-memory, type-erased, relationship-aware object cache.
///
/// Share it across threads with `Arc<RelCache>`. Dropping the last handle
/// lets the background threads drain their queues and exit.
pub struct RelCache {
    shared: Arc<Shared>,
    /// Held across ticket reservation and send, so the writer receives jobs
    /// in ticket order.
    writes: Mutex<Sender<WriteJob>>,
    config: CacheConfig,
}

impl RelCache {
    /// Create a cache and start its writer and notifier threads.
    pub fn new(config: CacheConfig) -> RelCacheResult<Self> {
        config.validate()?;

        let counters = Counters::default();
        let (notifier, _notifier_thread) = Notifier::spawn(
            &config.notifier_thread_name,
            config.isolate_observer_panics,
            Arc::clone(&counters.delivered),
        )?;

        let shared = Arc::new(Shared {
            gate: FifoGate::new(CacheState::default()),
            notifier,
            counters,
        });

        let (writes, rx) = mpsc::channel();
        let writer_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name(config.writer_thread_name.clone())
            .spawn(move || run_writer(writer_shared, rx))
            .map_err(|e| RuntimeError::ThreadSpawn {
                name: config.writer_thread_name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            shared,
            writes: Mutex::new(writes),
            config,
        })
    }

    /// Create a cache with default configuration.
    pub fn with_defaults() -> RelCacheResult<Self> {
        Self::new(CacheConfig::default())
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Typed point lookup.
    ///
    /// Returns `None` if nothing was written under the key, or if the stored
    /// value is of another kind.
    pub fn get<T: Identifiable>(&self, id: &T::Id) -> Option<T> {
        self.get_by_key(&Key::of::<T>(id))
    }

    /// Typed lookup by full key.
    pub fn get_by_key<T: Identifiable>(&self, key: &Key) -> Option<T> {
        let found = self.shared.gate.read().get::<T>(key).cloned();
        self.shared.counters.record_lookup(found.is_some());
        found
    }

    /// Whether any value is stored under `key`.
    pub fn contains(&self, key: &Key) -> bool {
        self.shared.gate.read().values.contains(key)
    }

    /// Keys `key`'s current value directly depends on.
    pub fn related_keys(&self, key: &Key) -> Vec<Key> {
        self.shared
            .gate
            .read()
            .relationships
            .edges(key)
            .map(|edges| edges.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = {
            let state = self.shared.gate.read();
            CacheStats {
                entry_count: state.values.len() as u64,
                edge_count: state.relationships.edge_count() as u64,
                observer_count: state.registry.live_count() as u64,
                ..Default::default()
            }
        };
        self.shared.counters.snapshot_into(&mut stats);
        stats
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Write `value` under its key.
    ///
    /// A stored record of the same kind is combined with `value` through
    /// [`Identifiable::merge`], so mergeable kinds merge field-wise and all
    /// others are replaced. Returns once the write is ordered, not once it is
    /// applied.
    pub fn set<T: Identifiable>(&self, value: T) -> RelCacheResult<()> {
        self.submit(Box::new(move |state| HashSet::from([state.set(value)])))
    }

    /// Same as [`RelCache::set`], restricted to mergeable kinds.
    pub fn set_merged<T: Mergeable>(&self, value: T) -> RelCacheResult<()> {
        self.set(value)
    }

    /// Clear every value and relationship edge. Observers stay registered.
    ///
    /// Returns once the write is ordered, not once it is applied.
    pub fn remove_all(&self) -> RelCacheResult<()> {
        self.submit(Box::new(|state| state.remove_all().into_iter().collect()))
    }

    fn submit(&self, op: WriteOp) -> RelCacheResult<()> {
        let writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        let ticket = self.shared.gate.reserve(Mode::Exclusive);
        // On failure the job, and with it the ticket, is dropped here.
        writes.send(WriteJob { ticket, op }).map_err(|_| {
            error!("write rejected: writer thread has stopped");
            RuntimeError::WriterStopped
        })?;
        Ok(())
    }

    /// Run `f` as one atomic batch and notify each affected observer once.
    ///
    /// `f` runs on the calling thread inside a single exclusive section. It
    /// must not call blocking methods of this cache; doing so panics. If `f`
    /// panics, writes made so far stay applied and nothing is notified.
    pub fn perform_batch<R>(&self, f: impl FnOnce(&mut Transaction<'_>) -> R) -> R {
        let mut access = self.shared.gate.write();
        let (result, touched) = {
            let mut tx = Transaction::new(&mut *access);
            let result = f(&mut tx);
            (result, tx.into_touched())
        };
        debug!(touched = touched.len(), "batch committed");
        self.shared.commit(access, &touched);
        result
    }

    /// Delete every value not reachable from a live observation.
    pub fn prune(&self) -> PruneReport {
        let mut access = self.shared.gate.write();
        let report = prune::prune(&mut access);
        self.shared.counters.record_pruned(report.removed);
        report
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Watch the value of kind `T` with identity `id`.
    ///
    /// `callback` runs on the notifier thread every time the value, or
    /// anything it transitively depends on, is written. It receives the
    /// latest stored value and is skipped while no value is stored. The
    /// observation lasts until the returned handle is released.
    pub fn observe<T, F>(&self, id: &T::Id, callback: F) -> ObservationHandle
    where
        T: Identifiable,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.observe_key(Key::of::<T>(id), callback)
    }

    /// Watch the value of kind `T` stored under `key`.
    pub fn observe_key<T, F>(&self, key: Key, callback: F) -> ObservationHandle
    where
        T: Identifiable,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let entry = Arc::new(ObserverEntry::typed::<T, F>(key, callback));
        self.shared.gate.write().registry.register(&entry);
        debug!(key = %entry.key(), "observer registered");
        ObservationHandle::new(entry)
    }

    /// A live cell for the value of kind `T` with identity `id`.
    pub fn live<T: Identifiable>(self: &Arc<Self>, id: &T::Id) -> LiveValue<T> {
        LiveValue::new(self, Key::of::<T>(id))
    }

    /// Wait until every write submitted before this call is applied and all
    /// of its notifications have been delivered.
    ///
    /// Fails with [`RuntimeError::FlushFromObserver`] when called from an
    /// observer callback.
    pub fn flush(&self) -> RelCacheResult<()> {
        if notify::on_notifier_thread() {
            return Err(RuntimeError::FlushFromObserver.into());
        }
        let ack = {
            let _access = self.shared.gate.write();
            self.shared.notifier.marker()?
        };
        ack.recv().map_err(|_| RuntimeError::NotifierStopped)?;
        Ok(())
    }
}

impl fmt::Debug for RelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelCache")
            .field("config", &self.config)
            .field("pending", &self.shared.gate.pending())
            .finish_non_exhaustive()
    }
}

fn run_writer(shared: Arc<Shared>, rx: Receiver<WriteJob>) {
    info!("writer thread started");

    for WriteJob { ticket, op } in rx {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut access = shared.gate.enter_exclusive(ticket);
            let touched = op(&mut *access);
            shared.commit(access, &touched);
        }));
        if outcome.is_err() {
            // Identifiable implementations run inside the job.
            error!("queued write panicked; it may be partially applied and was not notified");
        }
    }

    info!("writer thread stopped");
}

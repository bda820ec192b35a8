//! Background delivery of observer notifications.
//!
//! Deliveries are computed inside the exclusive section and handed to the
//! notifier thread before the section ends, so the channel sees them in the
//! same total order as the writes that produced them. Callbacks then run
//! outside the gate and may call back into the cache.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use relcache_core::{RelCacheResult, RuntimeError};
use tracing::{info, warn};

use crate::propagation::Delivery;

thread_local! {
    static ON_NOTIFIER: Cell<bool> = const { Cell::new(false) };
}

/// Whether the calling thread is a notifier thread.
pub(crate) fn on_notifier_thread() -> bool {
    ON_NOTIFIER.with(Cell::get)
}

enum Notice {
    Deliver(Vec<Delivery>),
    Flush(SyncSender<()>),
}

/// Sending half of the notification queue.
pub(crate) struct Notifier {
    tx: Sender<Notice>,
}

impl Notifier {
    /// Start the notifier thread.
    pub fn spawn(
        name: &str,
        isolate_panics: bool,
        delivered: Arc<AtomicU64>,
    ) -> RelCacheResult<(Self, JoinHandle<()>)> {
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(rx, isolate_panics, &delivered))
            .map_err(|e| RuntimeError::ThreadSpawn {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        Ok((Self { tx }, handle))
    }

    /// Queue a batch of deliveries.
    pub fn dispatch(&self, deliveries: Vec<Delivery>) -> RelCacheResult<()> {
        if deliveries.is_empty() {
            return Ok(());
        }
        self.tx
            .send(Notice::Deliver(deliveries))
            .map_err(|_| RuntimeError::NotifierStopped.into())
    }

    /// Queue a marker; the returned receiver fires once every delivery
    /// queued before it has run.
    pub fn marker(&self) -> RelCacheResult<Receiver<()>> {
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        self.tx
            .send(Notice::Flush(ack_tx))
            .map_err(|_| RuntimeError::NotifierStopped)?;
        Ok(ack_rx)
    }
}

fn run(rx: Receiver<Notice>, isolate_panics: bool, delivered: &AtomicU64) {
    ON_NOTIFIER.with(|flag| flag.set(true));
    info!("notifier thread started");

    for notice in rx {
        match notice {
            Notice::Deliver(batch) => {
                for delivery in batch {
                    if deliver(&delivery, isolate_panics) {
                        delivered.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            Notice::Flush(ack) => {
                // The flusher may have given up waiting.
                let _ = ack.send(());
            }
        }
    }

    info!("notifier thread stopped");
}

fn deliver(delivery: &Delivery, isolate_panics: bool) -> bool {
    let value = &*delivery.value;
    if !isolate_panics {
        return delivery.entry.invoke(value);
    }
    match panic::catch_unwind(AssertUnwindSafe(|| delivery.entry.invoke(value))) {
        Ok(ran) => ran,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            warn!(key = %delivery.entry.key(), %message, "observer callback panicked");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ObservationHandle, ObserverEntry};
    use relcache_core::{Identifiable, RelCacheError};
    use relcache_test_utils::Tag;
    use std::sync::Mutex;

    fn delivery_for(tag: Tag, seen: &Arc<Mutex<Vec<String>>>) -> (ObservationHandle, Delivery) {
        let seen = Arc::clone(seen);
        let entry = Arc::new(ObserverEntry::typed::<Tag, _>(tag.key(), move |t| {
            seen.lock().unwrap().push(t.name.clone());
        }));
        let handle = ObservationHandle::new(Arc::clone(&entry));
        (
            handle,
            Delivery {
                entry,
                value: Arc::new(tag),
            },
        )
    }

    #[test]
    fn test_deliveries_run_in_order_before_marker() {
        let delivered = Arc::new(AtomicU64::new(0));
        let (notifier, _join) =
            Notifier::spawn("test-notifier", true, Arc::clone(&delivered)).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (_h1, d1) = delivery_for(Tag::new("one"), &seen);
        let (_h2, d2) = delivery_for(Tag::new("two"), &seen);
        notifier.dispatch(vec![d1]).unwrap();
        notifier.dispatch(vec![d2]).unwrap();
        notifier.marker().unwrap().recv().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["one", "two"]);
        assert_eq!(delivered.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_disposed_entry_skipped_at_delivery() {
        let delivered = Arc::new(AtomicU64::new(0));
        let (notifier, _join) =
            Notifier::spawn("test-notifier", true, Arc::clone(&delivered)).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (handle, d) = delivery_for(Tag::new("late"), &seen);
        drop(handle);
        notifier.dispatch(vec![d]).unwrap();
        notifier.marker().unwrap().recv().unwrap();

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(delivered.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_isolated_panic_keeps_thread_alive() {
        let delivered = Arc::new(AtomicU64::new(0));
        let (notifier, _join) =
            Notifier::spawn("test-notifier", true, Arc::clone(&delivered)).unwrap();

        let tag = Tag::new("boom");
        let entry = Arc::new(ObserverEntry::typed::<Tag, _>(tag.key(), |_| {
            panic!("observer failure");
        }));
        let _handle = ObservationHandle::new(Arc::clone(&entry));
        notifier
            .dispatch(vec![Delivery {
                entry,
                value: Arc::new(tag),
            }])
            .unwrap();

        assert!(notifier.marker().unwrap().recv().is_ok());
    }

    #[test]
    fn test_unisolated_panic_stops_thread() {
        let delivered = Arc::new(AtomicU64::new(0));
        let (notifier, join) =
            Notifier::spawn("test-notifier", false, Arc::clone(&delivered)).unwrap();

        let tag = Tag::new("boom");
        let entry = Arc::new(ObserverEntry::typed::<Tag, _>(tag.key(), |_| {
            panic!("observer failure");
        }));
        let _handle = ObservationHandle::new(Arc::clone(&entry));
        notifier
            .dispatch(vec![Delivery {
                entry,
                value: Arc::new(tag),
            }])
            .unwrap();
        assert!(join.join().is_err());

        let err = notifier.marker().unwrap_err();
        assert_eq!(err, RelCacheError::Runtime(RuntimeError::NotifierStopped));
    }

    #[test]
    fn test_flag_only_set_on_notifier_thread() {
        assert!(!on_notifier_thread());
    }
}

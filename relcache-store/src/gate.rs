//! FIFO readers/writer admission gate.
//!
//! [`FifoGate<T>`] owns the cache state and admits operations strictly in
//! the order their [`Ticket`]s were issued:
//!
//! - a shared ticket is admitted once every ticket ahead of it is shared,
//!   so consecutive reads run concurrently;
//! - an exclusive ticket is admitted only at the head of the queue, so it
//!   waits for every earlier read and write and holds back every later one.
//!
//! Tickets can be reserved on one thread and entered on another. The write
//! queue relies on this: a caller reserves its writer ticket synchronously,
//! which fixes the write's position in the order, and the writer thread
//! enters it later.
//!
//! # Invariants
//!
//! 1. Admission order equals ticket order, except that adjacent shared
//!    tickets may overlap.
//! 2. A ticket leaves the queue when its access guard drops, or when the
//!    ticket itself drops without ever being entered. Both happen on every
//!    exit path, unwinding included.
//! 3. A thread already inside a gate never waits on that gate again; doing
//!    so panics instead of deadlocking.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{
    Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

/// Admission mode of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Pure read; may overlap other shared tickets.
    Shared,
    /// Mutation; runs alone.
    Exclusive,
}

thread_local! {
    /// Gates the current thread is inside of, by admission queue address.
    static HELD: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug, Default)]
struct Queue {
    next_ticket: u64,
    /// Pending and admitted tickets in issue order.
    entries: VecDeque<(u64, Mode)>,
}

impl Queue {
    fn admits(&self, id: u64) -> bool {
        let mut ahead_all_shared = true;
        for (index, (ticket, mode)) in self.entries.iter().enumerate() {
            if *ticket == id {
                return match mode {
                    Mode::Exclusive => index == 0,
                    Mode::Shared => ahead_all_shared,
                };
            }
            if *mode == Mode::Exclusive {
                ahead_all_shared = false;
            }
        }
        false
    }

    fn remove(&mut self, id: u64) {
        if let Some(pos) = self.entries.iter().position(|(t, _)| *t == id) {
            self.entries.remove(pos);
        }
    }
}

#[derive(Debug, Default)]
struct Admission {
    queue: Mutex<Queue>,
    changed: Condvar,
}

impl Admission {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn id(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }
}

/// A reserved place in a gate's admission order.
///
/// Dropping a ticket that was never entered gives up the place.
#[derive(Debug)]
pub struct Ticket {
    admission: Arc<Admission>,
    id: u64,
    mode: Mode,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.admission.lock().remove(self.id);
        self.admission.changed.notify_all();
    }
}

/// FIFO-ordered readers/writer gate around a value of type `T`.
#[derive(Debug, Default)]
pub struct FifoGate<T> {
    admission: Arc<Admission>,
    data: RwLock<T>,
}

impl<T> FifoGate<T> {
    /// Create a gate guarding `data`.
    pub fn new(data: T) -> Self {
        Self {
            admission: Arc::new(Admission::default()),
            data: RwLock::new(data),
        }
    }

    /// Reserve the next place in the admission order without waiting.
    pub fn reserve(&self, mode: Mode) -> Ticket {
        let mut queue = self.admission.lock();
        let id = queue.next_ticket;
        queue.next_ticket += 1;
        queue.entries.push_back((id, mode));
        Ticket {
            admission: Arc::clone(&self.admission),
            id,
            mode,
        }
    }

    /// Reserve a shared ticket and wait for admission.
    pub fn read(&self) -> ReadAccess<'_, T> {
        let ticket = self.reserve(Mode::Shared);
        self.enter_shared(ticket)
    }

    /// Reserve an exclusive ticket and wait for admission.
    pub fn write(&self) -> WriteAccess<'_, T> {
        let ticket = self.reserve(Mode::Exclusive);
        self.enter_exclusive(ticket)
    }

    /// Wait for a previously reserved shared ticket.
    ///
    /// # Panics
    ///
    /// If the ticket was reserved on another gate or with another mode, or
    /// if the calling thread is already inside this gate.
    pub fn enter_shared(&self, ticket: Ticket) -> ReadAccess<'_, T> {
        assert_eq!(ticket.mode, Mode::Shared, "shared access needs a shared ticket");
        self.admit(&ticket);
        let guard = self.data.read().unwrap_or_else(PoisonError::into_inner);
        ReadAccess {
            guard,
            _held: Held::new(&self.admission),
            _ticket: ticket,
        }
    }

    /// Wait for a previously reserved exclusive ticket.
    ///
    /// # Panics
    ///
    /// If the ticket was reserved on another gate or with another mode, or
    /// if the calling thread is already inside this gate.
    pub fn enter_exclusive(&self, ticket: Ticket) -> WriteAccess<'_, T> {
        assert_eq!(
            ticket.mode,
            Mode::Exclusive,
            "exclusive access needs an exclusive ticket"
        );
        self.admit(&ticket);
        let guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        WriteAccess {
            guard,
            _held: Held::new(&self.admission),
            _ticket: ticket,
        }
    }

    /// Number of tickets reserved but not yet released.
    pub fn pending(&self) -> usize {
        self.admission.lock().entries.len()
    }

    fn admit(&self, ticket: &Ticket) {
        assert!(
            Arc::ptr_eq(&ticket.admission, &self.admission),
            "ticket was reserved on a different gate"
        );
        let gate_id = self.admission.id();
        let reentrant = HELD.with(|held| held.borrow().contains(&gate_id));
        assert!(
            !reentrant,
            "re-entrant cache access: this thread is already inside the cache's \
             exclusive section (do not call the cache from a batch closure)"
        );

        let mut queue = self.admission.lock();
        while !queue.admits(ticket.id) {
            queue = self
                .admission
                .changed
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Marks the current thread as inside a gate for the guard's lifetime.
struct Held {
    gate_id: usize,
}

impl Held {
    fn new(admission: &Arc<Admission>) -> Self {
        let gate_id = admission.id();
        HELD.with(|held| held.borrow_mut().push(gate_id));
        Self { gate_id }
    }
}

impl Drop for Held {
    fn drop(&mut self) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|id| *id == self.gate_id) {
                held.remove(pos);
            }
        });
    }
}

/// Shared access to the gated value. Releases its ticket on drop.
pub struct ReadAccess<'a, T> {
    // Field order is drop order: data lock, then thread mark, then ticket.
    guard: RwLockReadGuard<'a, T>,
    _held: Held,
    _ticket: Ticket,
}

impl<T> Deref for ReadAccess<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

/// Exclusive access to the gated value. Releases its ticket on drop.
pub struct WriteAccess<'a, T> {
    guard: RwLockWriteGuard<'a, T>,
    _held: Held,
    _ticket: Ticket,
}

impl<T> Deref for WriteAccess<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for WriteAccess<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_read_write_roundtrip() {
        let gate = FifoGate::new(1u32);
        *gate.write() += 1;
        assert_eq!(*gate.read(), 2);
        assert_eq!(gate.pending(), 0);
    }

    #[test]
    fn test_queue_admission_rules() {
        let mut queue = Queue::default();
        queue.entries.extend([
            (0, Mode::Shared),
            (1, Mode::Shared),
            (2, Mode::Exclusive),
            (3, Mode::Shared),
        ]);

        assert!(queue.admits(0));
        assert!(queue.admits(1));
        assert!(!queue.admits(2));
        assert!(!queue.admits(3));

        queue.remove(0);
        queue.remove(1);
        assert!(queue.admits(2));
        assert!(!queue.admits(3));

        queue.remove(2);
        assert!(queue.admits(3));
    }

    #[test]
    fn test_unused_ticket_releases_place() {
        let gate = FifoGate::new(());
        let ticket = gate.reserve(Mode::Exclusive);
        assert_eq!(gate.pending(), 1);
        drop(ticket);
        assert_eq!(gate.pending(), 0);
        let _read = gate.read();
    }

    #[test]
    fn test_reserved_write_blocks_later_read() {
        let gate = Arc::new(FifoGate::new(0u32));
        let ticket = gate.reserve(Mode::Exclusive);

        let (tx, rx) = mpsc::channel();
        let reader_gate = Arc::clone(&gate);
        let reader = thread::spawn(move || {
            let value = *reader_gate.read();
            tx.send(value).expect("send read result");
        });

        // The read holds a later ticket and must not be admitted yet.
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        {
            let mut access = gate.enter_exclusive(ticket);
            *access = 7;
        }

        assert_eq!(rx.recv().expect("reader result"), 7);
        reader.join().expect("reader thread");
    }

    #[test]
    fn test_concurrent_readers_overlap() {
        let gate = Arc::new(FifoGate::new(()));
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let first = gate.read();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let inside = Arc::clone(&inside);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    let _access = gate.read();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.join().expect("reader thread");
        }
        drop(first);
        assert!(peak.load(Ordering::SeqCst) > 1);
    }

    #[test]
    #[should_panic(expected = "re-entrant cache access")]
    fn test_reentrant_access_panics() {
        let gate = FifoGate::new(());
        let _outer = gate.write();
        let _inner = gate.read();
    }

    #[test]
    fn test_panic_inside_write_releases_gate() {
        let gate = Arc::new(FifoGate::new(0u32));
        let panicking = Arc::clone(&gate);
        let result = thread::spawn(move || {
            let mut access = panicking.write();
            *access = 5;
            panic!("boom");
        })
        .join();
        assert!(result.is_err());

        assert_eq!(gate.pending(), 0);
        assert_eq!(*gate.read(), 5);
    }
}

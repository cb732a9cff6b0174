//! Multi-listener fan-out for the three status/event streams (spec.md
//! §4.5). A single generic implementation backs all three concrete
//! broadcaster types; each listener gets its own bounded channel so one
//! slow consumer never blocks the publisher or the other listeners.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::trace;

/// Default per-listener channel capacity. Small on purpose: a listener
/// that cannot keep up with state transitions should catch up via the
/// status provider's current-state accessor, not by buffering history.
const DEFAULT_CAPACITY: usize = 10;

/// Identifies a listener for [`Broadcaster::remove_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A receive-only handle returned by [`Broadcaster::add_listener`]. Drop
/// it (or call [`Broadcaster::remove_listener`] with its id) to stop
/// receiving broadcasts.
pub struct Listener<T> {
    pub id: ListenerId,
    receiver: mpsc::Receiver<T>,
}

impl<T> Listener<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }
}

struct Inner<T> {
    next_id: u64,
    listeners: HashMap<u64, mpsc::Sender<T>>,
    closed: bool,
}

/// A small pub/sub fabric with bounded, drop-on-overflow delivery per
/// listener and FIFO ordering within a listener.
pub struct Broadcaster<T: Clone + Send + 'static> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
    name: &'static str,
    listener_count: AtomicU64,
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    pub fn new(name: &'static str) -> Self {
        Self::with_capacity(name, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(name: &'static str, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { next_id: 0, listeners: HashMap::new(), closed: false }),
            capacity: capacity.max(1),
            name,
            listener_count: AtomicU64::new(0),
        }
    }

    /// Registers a new listener and returns its receive-only handle. If
    /// the broadcaster has already been closed, the returned listener's
    /// channel is immediately closed (its first `recv` returns `None`).
    pub fn add_listener(&self) -> Listener<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut inner = self.inner.lock().expect("broadcaster lock poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        if !inner.closed {
            inner.listeners.insert(id, tx);
            self.listener_count.fetch_add(1, Ordering::Relaxed);
        }
        Listener { id: ListenerId(id), receiver: rx }
    }

    /// Idempotent: removing an id twice, or an id that was never
    /// registered, is a no-op. The underlying channel is dropped, which
    /// closes it from this side.
    pub fn remove_listener(&self, id: ListenerId) {
        let mut inner = self.inner.lock().expect("broadcaster lock poisoned");
        if inner.listeners.remove(&id.0).is_some() {
            self.listener_count.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Fans `value` out to every live listener. Non-blocking: a listener
    /// whose channel is full has a broadcast dropped for it rather than
    /// stalling this call. A closed broadcaster silently drops the
    /// value.
    pub fn broadcast(&self, value: T) {
        let inner = self.inner.lock().expect("broadcaster lock poisoned");
        if inner.closed {
            return;
        }
        for sender in inner.listeners.values() {
            if let Err(mpsc::error::TrySendError::Full(_)) = sender.try_send(value.clone()) {
                trace!(broadcaster = self.name, "dropping broadcast for slow listener");
            }
        }
    }

    /// Closes every listener channel; further broadcasts are no-ops.
    /// Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("broadcaster lock poisoned");
        inner.closed = true;
        inner.listeners.clear();
        self.listener_count.store(0, Ordering::Relaxed);
    }

    pub fn listener_count(&self) -> usize {
        self.listener_count.load(Ordering::Relaxed) as usize
    }
}

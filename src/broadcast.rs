//! Fan-out of update events to stream subscribers.
//!
//! [`Broadcaster`] keeps one bounded queue per live subscriber.
//!
//! - [`Broadcaster::publish`] never blocks: when a subscriber's queue is full
//!   its oldest pending event is discarded to make room.
//! - [`Broadcaster::subscribe`] hands the new subscriber a snapshot that is
//!   always delivered before any queued update.
//! - Dropping a [`Subscription`] marks it dead; the next publish prunes it.
//!
//! Publishing and subscribing share one lock, so events reach every
//! subscriber in the order they were published, and the `_with` variants let
//! a caller produce the event or snapshot inside that critical section.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::model::{BinView, StreamMessage, UpdateEvent};

/// Default per-subscriber queue length.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

pub struct Broadcaster {
    capacity: usize,
    inner: Mutex<Subscribers>,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    slots: Vec<Slot>,
}

struct Slot {
    id: u64,
    tx: Sender<UpdateEvent>,
    // Second handle on the queue, used only to evict the oldest event.
    evict: Receiver<UpdateEvent>,
    alive: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl Slot {
    fn deliver(&self, event: UpdateEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                // Subscriber is overwhelmed; shed the oldest pending event.
                if self.evict.try_recv().is_ok() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(subscriber = self.id, "subscriber queue full, dropped oldest event");
                }
                if self.tx.try_send(event).is_err() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                self.alive.store(false, Ordering::Release);
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

impl Broadcaster {
    /// Creates a broadcaster whose subscribers each buffer up to `capacity`
    /// events. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Subscribers::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of subscribers that have not been dropped or unsubscribed.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().slots.iter().filter(|slot| slot.is_alive()).count()
    }

    /// Registers a subscriber whose first message is `snapshot`.
    pub fn subscribe(&self, snapshot: BTreeMap<String, BinView>) -> Subscription {
        self.subscribe_with(|| snapshot)
    }

    /// Registers a subscriber, building its snapshot while no event can be
    /// published. Any event published afterwards is queued for it.
    pub fn subscribe_with<F>(&self, snapshot: F) -> Subscription
    where
        F: FnOnce() -> BTreeMap<String, BinView>,
    {
        let mut inner = self.inner.lock();
        let bins = snapshot();

        let id = inner.next_id;
        inner.next_id += 1;

        let (tx, rx) = crossbeam_channel::bounded(self.capacity);
        let alive = Arc::new(AtomicBool::new(true));
        let dropped = Arc::new(AtomicU64::new(0));

        inner.slots.push(Slot {
            id,
            tx,
            evict: rx.clone(),
            alive: Arc::clone(&alive),
            dropped: Arc::clone(&dropped),
        });
        debug!(subscriber = id, "subscriber registered");

        Subscription {
            id,
            snapshot: Some(StreamMessage::Snapshot { bins }),
            rx,
            alive,
            dropped,
        }
    }

    /// Deregisters a subscriber. Unknown or already removed ids are ignored.
    pub fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock();
        if let Some(position) = inner.slots.iter().position(|slot| slot.id == id) {
            let slot = inner.slots.swap_remove(position);
            slot.alive.store(false, Ordering::Release);
            debug!(subscriber = id, "subscriber removed");
        }
    }

    /// Delivers `event` to every live subscriber.
    pub fn publish(&self, event: UpdateEvent) {
        let mut inner = self.inner.lock();
        Self::deliver_all(&mut inner, event);
    }

    /// Produces an event and delivers it within one critical section.
    ///
    /// Writers that go through here are serialized, so the order in which
    /// their state changes are applied is the order subscribers observe. Errors
    /// from `produce` are returned without publishing anything.
    pub fn publish_with<F, E>(&self, produce: F) -> Result<UpdateEvent, E>
    where
        F: FnOnce() -> Result<UpdateEvent, E>,
    {
        let mut inner = self.inner.lock();
        let event = produce()?;
        Self::deliver_all(&mut inner, event.clone());
        Ok(event)
    }

    fn deliver_all(inner: &mut Subscribers, event: UpdateEvent) {
        inner.slots.retain(|slot| {
            let alive = slot.is_alive();
            if !alive {
                debug!(subscriber = slot.id, "pruned closed subscriber");
            }
            alive
        });
        for slot in &inner.slots {
            slot.deliver(event.clone());
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

/// A live registration with a [`Broadcaster`].
///
/// Yields the snapshot first, then update events in publish order. The
/// sequence ends once the subscriber is unsubscribed or the broadcaster is
/// dropped; it cannot be rewound, only replaced by a fresh subscription.
pub struct Subscription {
    id: u64,
    snapshot: Option<StreamMessage>,
    rx: Receiver<UpdateEvent>,
    alive: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Events discarded because this subscriber fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Blocks until the next message, or returns `None` once the
    /// subscription has been closed.
    pub fn recv(&mut self) -> Option<StreamMessage> {
        if let Some(snapshot) = self.snapshot.take() {
            return Some(snapshot);
        }
        self.rx.recv().ok().map(|data| StreamMessage::Update { data })
    }

    /// Waits up to `timeout` for the next message.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<StreamMessage, RecvTimeoutError> {
        if let Some(snapshot) = self.snapshot.take() {
            return Ok(snapshot);
        }
        self.rx
            .recv_timeout(timeout)
            .map(|data| StreamMessage::Update { data })
    }

    /// Returns the next message if one is ready.
    pub fn try_recv(&mut self) -> Option<StreamMessage> {
        if let Some(snapshot) = self.snapshot.take() {
            return Some(snapshot);
        }
        self.rx.try_recv().ok().map(|data| StreamMessage::Update { data })
    }
}

impl Iterator for Subscription {
    type Item = StreamMessage;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

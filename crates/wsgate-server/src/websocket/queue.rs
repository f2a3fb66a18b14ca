//! Ordered per-connection queue shared by the reader, the dispatch pool and
//! the hub.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::mpsc;

/// One item on a connection's ordered queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueMessage {
    /// Raw inbound frame from the reader.
    Request(String),
    /// Serialized result frame from the dispatch pool.
    Response(String),
    /// Serialized frame pushed by the hub (broadcast, unicast, send).
    Push(String),
    /// The peer went away.
    Closed,
}

/// Producer side of a connection queue.
pub type QueueSender = mpsc::UnboundedSender<QueueMessage>;

/// Consumer side of a connection queue, owned by the mainloop.
pub type QueueReceiver = mpsc::UnboundedReceiver<QueueMessage>;

/// Create a fresh unbounded connection queue.
pub fn channel() -> (QueueSender, QueueReceiver) {
    mpsc::unbounded_channel()
}

/// Enqueue `message`, returning `false` once the mainloop has gone away.
pub fn enqueue(queue: &QueueSender, message: QueueMessage) -> bool {
    queue.send(message).is_ok()
}

/// Default cap on hub pushes waiting in one connection's queue.
pub const DEFAULT_MAX_PENDING_PUSHES: usize = 256;

/// Caps hub pushes waiting on one connection's queue.
///
/// Requests, responses and `Closed` are never gated; only hub pushes are,
/// so a subscriber that stops draining cannot grow memory without bound.
#[derive(Debug)]
pub struct PushGate {
    pending: AtomicUsize,
    limit: usize,
    dropped: AtomicU64,
}

impl PushGate {
    /// Gate admitting at most `limit` pending pushes (at least one).
    pub fn new(limit: usize) -> Self {
        Self {
            pending: AtomicUsize::new(0),
            limit: limit.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Reserve a slot for one push. `false` (and a drop recorded) when full.
    pub fn try_acquire(&self) -> bool {
        let admitted = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .is_ok();
        if !admitted {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        admitted
    }

    /// Free a slot once its push left the queue (or never entered it).
    pub fn release(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Pushes currently queued.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Pushes refused so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for PushGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING_PUSHES)
    }
}

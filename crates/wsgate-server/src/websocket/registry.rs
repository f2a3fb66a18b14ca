//! Process-wide connection registry.
//!
//! Maps each live connection id to its outbound queue and context data. An
//! entry exists from the moment the middleware chain accepts a connection
//! until its mainloop exits.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use metrics::counter;
use tracing::debug;
use wsgate_rpc::{ConnectionId, ContextData};

use super::queue::{self, PushGate, QueueMessage, QueueSender};
use crate::metrics::HUB_PUSH_DROPPED_TOTAL;

/// A registered connection.
#[derive(Debug)]
pub struct ConnectionEntry {
    /// Connection id.
    pub id: ConnectionId,
    /// Context data, fixed once the connection is registered.
    pub context_data: Arc<ContextData>,
    /// Sender side of the connection's ordered queue.
    outbound: QueueSender,
    /// Caps hub pushes waiting in `outbound`.
    push_gate: Arc<PushGate>,
    /// When the connection was registered.
    pub connected_at: Instant,
}

impl ConnectionEntry {
    /// Create an entry with the default push cap.
    pub fn new(id: ConnectionId, context_data: Arc<ContextData>, outbound: QueueSender) -> Self {
        Self {
            id,
            context_data,
            outbound,
            push_gate: Arc::new(PushGate::default()),
            connected_at: Instant::now(),
        }
    }

    /// Cap pending hub pushes at `limit`.
    #[must_use]
    pub fn with_push_limit(mut self, limit: usize) -> Self {
        self.push_gate = Arc::new(PushGate::new(limit));
        self
    }

    /// Gate the mainloop releases as it drains pushes.
    pub fn push_gate(&self) -> Arc<PushGate> {
        Arc::clone(&self.push_gate)
    }

    /// Push a serialized frame onto the connection's queue.
    ///
    /// Returns `false` if the mainloop is already gone or too many pushes are
    /// already waiting; the frame is dropped in both cases.
    pub fn push(&self, frame: String) -> bool {
        if !self.push_gate.try_acquire() {
            counter!(HUB_PUSH_DROPPED_TOTAL).increment(1);
            debug!(connection_id = %self.id, "push queue full, dropping frame");
            return false;
        }
        if queue::enqueue(&self.outbound, QueueMessage::Push(frame)) {
            true
        } else {
            self.push_gate.release();
            false
        }
    }
}

/// Live connections keyed by id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionEntry>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Replaces (and returns) any entry with the same id.
    pub fn register(&self, entry: ConnectionEntry) -> Option<Arc<ConnectionEntry>> {
        debug!(connection_id = %entry.id, "registering connection");
        self.connections.insert(entry.id.clone(), Arc::new(entry))
    }

    /// Remove an entry, returning it if it was present.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<ConnectionEntry>> {
        self.connections.remove(id).map(|(_, entry)| entry)
    }

    /// Look up an entry.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ConnectionEntry>> {
        self.connections.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Push a frame to one connection. `false` if it is not registered.
    pub fn send(&self, id: &ConnectionId, frame: String) -> bool {
        // Clone the entry out so no shard lock is held while pushing.
        match self.get(id) {
            Some(entry) => entry.push(frame),
            None => false,
        }
    }

    /// Copy of a connection's context data.
    pub fn context(&self, id: &ConnectionId) -> Option<ContextData> {
        self.get(id).map(|e| ContextData::clone(&e.context_data))
    }

    /// Registered connection ids, sorted.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.connections.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

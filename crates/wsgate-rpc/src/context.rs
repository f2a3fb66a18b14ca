//! Per-connection context handed to method providers.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::RpcError;

/// Key/value state derived from the upgrade request and context middlewares.
pub type ContextData = Map<String, Value>;

/// Opaque identifier of one live socket.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Pub/sub operations exposed to method providers.
///
/// Implemented by the gateway's hub. Every write is best-effort: missing
/// connections are skipped or reported as `false`, never as errors, except
/// for `subscribe`, which must materialize state for a live connection.
pub trait PubSub: Send + Sync {
    /// Sorted channels the connection is subscribed to.
    fn get_subscriptions(&self, id: &ConnectionId) -> Vec<String>;
    /// Subscribe a connection to a channel.
    fn subscribe(&self, id: &ConnectionId, channel: &str) -> Result<(), RpcError>;
    /// Unsubscribe a connection from a channel. Absent entries are a no-op.
    fn unsubscribe(&self, id: &ConnectionId, channel: &str);
    /// Send an event to every live subscriber of `channel`. Returns deliveries.
    fn broadcast(&self, channel: &str, event: &str, data: Value) -> usize;
    /// Send an event to a single connection.
    fn unicast(&self, id: &ConnectionId, event: &str, data: Value) -> bool;
    /// Send a pre-serialized frame to a single connection.
    fn send(&self, id: &ConnectionId, raw: String) -> bool;
    /// Context data of a registered connection.
    fn get_context(&self, id: &ConnectionId) -> Option<ContextData>;
}

/// Everything a provider sees about the call it is serving.
#[derive(Clone)]
pub struct CallContext {
    connection_id: ConnectionId,
    context_data: Arc<ContextData>,
    hub: Arc<dyn PubSub>,
}

impl CallContext {
    /// Create a call context.
    pub fn new(
        connection_id: ConnectionId,
        context_data: Arc<ContextData>,
        hub: Arc<dyn PubSub>,
    ) -> Self {
        Self {
            connection_id,
            context_data,
            hub,
        }
    }

    /// Connection the request arrived on.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Context data of that connection.
    pub fn context_data(&self) -> &ContextData {
        &self.context_data
    }

    /// The gateway's pub/sub hub.
    pub fn hub(&self) -> &Arc<dyn PubSub> {
        &self.hub
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("connection_id", &self.connection_id)
            .field("context_data", &self.context_data)
            .finish_non_exhaustive()
    }
}

/// Failure raised by a context middleware during the handshake.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct MiddlewareError(pub String);

/// Hook run once per new connection, before it is registered.
///
/// Returns the entries to merge into the context data.
pub trait ContextMiddleware: Send + Sync {
    /// Compute context updates from the context accumulated so far.
    fn apply(&self, context: &ContextData) -> Result<ContextData, MiddlewareError>;
}

impl<F> ContextMiddleware for F
where
    F: Fn(&ContextData) -> Result<ContextData, MiddlewareError> + Send + Sync,
{
    fn apply(&self, context: &ContextData) -> Result<ContextData, MiddlewareError> {
        self(context)
    }
}

/// Run `chain` in order over `initial`, merging each middleware's updates.
///
/// Stops at the first failure.
pub fn apply_middlewares(
    chain: &[Arc<dyn ContextMiddleware>],
    initial: ContextData,
) -> Result<ContextData, MiddlewareError> {
    let mut context = initial;
    for middleware in chain {
        let updates = middleware.apply(&context)?;
        context.extend(updates);
    }
    Ok(context)
}

//! Bridge between request handling and the worker scheduler.
//!
//! The scheduler executes providers on its own terms and reports back through
//! a completion callback. [`call_provider`] turns that callback into a value
//! the calling task can await: a `oneshot` rendezvous with the scheduler as
//! the single producer. Awaiting it is the only point where request handling
//! suspends on the scheduler; other connections keep running meanwhile.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::context::CallContext;
use crate::errors::RpcError;
use crate::registry::RpcMethod;

/// What a worker reports when it finishes.
pub type WorkerOutcome = Result<Value, RpcError>;

/// Callback the scheduler invokes exactly once with the worker's outcome.
pub type CompletionCallback = Box<dyn FnOnce(WorkerOutcome) + Send + 'static>;

/// A validated call ready to be executed by a worker.
pub struct WorkerCall {
    /// Method name, for logging and error messages.
    pub method: String,
    /// Provider to execute.
    pub provider: Arc<dyn RpcMethod>,
    /// Call context (connection id, context data, hub).
    pub context: CallContext,
    /// Arguments that passed the signature check.
    pub args: Map<String, Value>,
}

/// Service that runs workers and reports their outcome asynchronously.
pub trait WorkerScheduler: Send + Sync {
    /// Start executing `call`; invoke `on_complete` once it finishes.
    fn spawn_worker(&self, call: WorkerCall, on_complete: CompletionCallback);
}

/// Scheduler running each worker on its own tokio task.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioScheduler;

impl WorkerScheduler for TokioScheduler {
    fn spawn_worker(&self, call: WorkerCall, on_complete: CompletionCallback) {
        let _ = tokio::spawn(async move {
            let WorkerCall {
                method,
                provider,
                context,
                args,
            } = call;
            debug!(method, connection_id = %context.connection_id(), "worker started");
            let outcome = provider.call(context, args).await;
            on_complete(outcome);
        });
    }
}

/// Submit `call` to `scheduler` and wait for its outcome.
///
/// A callback dropped without being invoked yields `WorkerLost`; an outcome
/// that does not arrive within `timeout` yields `Timeout`.
pub async fn call_provider(
    scheduler: &dyn WorkerScheduler,
    call: WorkerCall,
    timeout: Duration,
) -> WorkerOutcome {
    let method = call.method.clone();
    let (tx, rx) = oneshot::channel();
    scheduler.spawn_worker(
        call,
        Box::new(move |outcome| {
            // Receiver is gone when the caller timed out; nothing to deliver.
            let _ = tx.send(outcome);
        }),
    );

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => {
            warn!(method, "worker dropped its completion callback");
            Err(RpcError::WorkerLost { method })
        }
        Err(_elapsed) => {
            warn!(method, ?timeout, "worker timed out");
            Err(RpcError::Timeout {
                method,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })
        }
    }
}

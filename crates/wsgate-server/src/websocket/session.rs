//! Connection mainloop: handles a single client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use wsgate_rpc::{
    CallContext, ConnectionId, ContextData, ContextMiddleware, EventFrame, MiddlewareErrorFrame,
    PubSub, apply_middlewares, encode,
};

use super::dispatch::DispatchPool;
use super::handler::RequestHandler;
use super::heartbeat::{Heartbeat, Liveness};
use super::hub::Hub;
use super::queue::{self, QueueMessage};
use super::reader::spawn_reader;
use super::registry::{ConnectionEntry, ConnectionRegistry};
use super::socket::{FrameSink, FrameSource};
use crate::error::GatewayError;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_HEARTBEAT_TIMEOUTS_TOTAL, WS_MIDDLEWARE_REJECTIONS_TOTAL,
};

/// Longest a single socket write may take before the peer is treated as gone.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest the closing handshake may take once the mainloop is done.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state every mainloop needs.
#[derive(Clone)]
pub struct SessionDeps {
    /// Connection registry.
    pub connections: Arc<ConnectionRegistry>,
    /// Pub/sub hub.
    pub hub: Arc<Hub>,
    /// Request handler shared by all dispatch pools.
    pub handler: Arc<RequestHandler>,
    /// Context middlewares, in registration order.
    pub middlewares: Arc<[Arc<dyn ContextMiddleware>]>,
    /// Dispatch pool size per connection.
    pub max_concurrency: usize,
    /// Hub pushes allowed to wait in one connection's queue.
    pub max_pending_pushes: usize,
    /// Ping cadence and pong deadline.
    pub heartbeat: Heartbeat,
    /// Cancelled on server shutdown.
    pub shutdown: CancellationToken,
}

/// Removes every trace of a connection when the mainloop exits, whichever
/// way it exits.
struct Teardown {
    id: ConnectionId,
    connections: Arc<ConnectionRegistry>,
    hub: Arc<Hub>,
    reader: Option<JoinHandle<()>>,
    started: Instant,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        // Registry first: a racing subscribe must see the connection gone
        // before the hub purge.
        let _ = self.connections.remove(&self.id);
        self.hub.cleanup_connection(&self.id);

        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(self.started.elapsed().as_secs_f64());
        info!(connection_id = %self.id, "client disconnected");
    }
}

async fn write_text<S: FrameSink>(sink: &mut S, frame: String) -> Result<(), GatewayError> {
    timeout(WRITE_TIMEOUT, sink.send_text(frame))
        .await
        .map_err(|_| GatewayError::Socket("write timed out".into()))?
}

async fn write_ping<S: FrameSink>(sink: &mut S) -> Result<(), GatewayError> {
    timeout(WRITE_TIMEOUT, sink.send_ping())
        .await
        .map_err(|_| GatewayError::Socket("ping timed out".into()))?
}

async fn close_with_deadline<S: FrameSink>(sink: &mut S) {
    if timeout(CLOSE_TIMEOUT, sink.close_socket()).await.is_err() {
        debug!("close handshake timed out");
    }
}

/// Run the mainloop for one accepted socket.
///
/// 1. Applies the context middlewares; on failure sends one error frame,
///    closes and returns without registering
/// 2. Registers the connection and sends the `connected` event
/// 3. Starts the reader and drains the connection queue, writing responses
///    and hub pushes, dispatching requests to the pool, pinging on each
///    heartbeat tick
/// 4. Tears everything down as soon as the loop ends, then closes the socket
#[instrument(skip_all, fields(connection_id = %id))]
pub async fn run_session<Src, Snk>(
    source: Src,
    mut sink: Snk,
    id: ConnectionId,
    initial_context: ContextData,
    deps: SessionDeps,
) where
    Src: FrameSource,
    Snk: FrameSink,
{
    let context = match apply_middlewares(&deps.middlewares, initial_context) {
        Ok(context) => Arc::new(context),
        Err(err) => {
            warn!(error = %err, "context middleware rejected connection");
            counter!(WS_MIDDLEWARE_REJECTIONS_TOTAL).increment(1);
            let _ = write_text(&mut sink, encode(&MiddlewareErrorFrame::new(err.to_string()))).await;
            close_with_deadline(&mut sink).await;
            return;
        }
    };

    let (tx, mut rx) = queue::channel();
    let entry = ConnectionEntry::new(id.clone(), Arc::clone(&context), tx.clone())
        .with_push_limit(deps.max_pending_pushes);
    let push_gate = entry.push_gate();
    let _ = deps.connections.register(entry);
    let mut teardown = Teardown {
        id: id.clone(),
        connections: Arc::clone(&deps.connections),
        hub: Arc::clone(&deps.hub),
        reader: None,
        started: Instant::now(),
    };
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    info!("client connected");

    if let Err(err) = write_text(&mut sink, encode(&EventFrame::connected(id.as_str()))).await {
        debug!(error = %err, "failed to send connected event");
        drop(teardown);
        return;
    }

    let liveness = Arc::new(Liveness::new());
    teardown.reader = Some(spawn_reader(source, tx.clone(), Arc::clone(&liveness)));
    let hub: Arc<dyn PubSub> = deps.hub.clone();
    let pool = DispatchPool::new(
        tx,
        Arc::clone(&deps.handler),
        CallContext::new(id, context, hub),
        deps.max_concurrency,
    );
    let mut ping_ticker = deps.heartbeat.ticker();

    loop {
        let message = tokio::select! {
            () = deps.shutdown.cancelled() => {
                debug!("server shutting down");
                break;
            }
            _ = ping_ticker.tick() => {
                if deps.heartbeat.expired(&liveness) {
                    warn!(timeout = ?deps.heartbeat.timeout, "client unresponsive, disconnecting");
                    counter!(WS_HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
                    break;
                }
                if let Err(err) = write_ping(&mut sink).await {
                    debug!(error = %err, "ping failed");
                    break;
                }
                continue;
            }
            message = rx.recv() => message,
        };
        match message {
            Some(QueueMessage::Request(raw)) => pool.dispatch(raw),
            Some(QueueMessage::Response(frame)) => {
                if let Err(err) = write_text(&mut sink, frame).await {
                    debug!(error = %err, "socket write failed");
                    break;
                }
            }
            Some(QueueMessage::Push(frame)) => {
                push_gate.release();
                if let Err(err) = write_text(&mut sink, frame).await {
                    debug!(error = %err, "socket write failed");
                    break;
                }
            }
            Some(QueueMessage::Closed) | None => break,
        }
    }

    // Unregister before the closing handshake, which a stalled peer may
    // never complete.
    drop(teardown);
    close_with_deadline(&mut sink).await;
}

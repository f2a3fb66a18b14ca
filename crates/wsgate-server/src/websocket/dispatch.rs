//! Per-connection dispatch pool.
//!
//! [`DispatchPool::dispatch`] never blocks the mainloop: it spawns a task
//! that waits for one of `max_concurrency` permits, handles the request and
//! pushes the result frame onto the connection queue. Results therefore
//! arrive in completion order.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;
use wsgate_rpc::CallContext;

use super::handler::RequestHandler;
use super::queue::{self, QueueMessage, QueueSender};

/// Default in-flight request limit per connection.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Bounded concurrent executor owned by one connection's mainloop.
pub struct DispatchPool {
    queue: QueueSender,
    handler: Arc<RequestHandler>,
    context: CallContext,
    permits: Arc<Semaphore>,
    max_concurrency: usize,
}

impl DispatchPool {
    /// Create a pool pushing results onto `queue`. A limit of `0` is raised to `1`.
    pub fn new(
        queue: QueueSender,
        handler: Arc<RequestHandler>,
        context: CallContext,
        max_concurrency: usize,
    ) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            queue,
            handler,
            context,
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    /// Schedule `raw` for handling and return immediately.
    pub fn dispatch(&self, raw: String) {
        let queue = self.queue.clone();
        let handler = Arc::clone(&self.handler);
        let context = self.context.clone();
        let permits = Arc::clone(&self.permits);
        let _ = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let response = handler.handle(&raw, &context).await;
            if !queue::enqueue(&queue, QueueMessage::Response(response)) {
                debug!(connection_id = %context.connection_id(), "connection gone, dropping response");
            }
        });
    }

    /// Requests currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.max_concurrency - self.permits.available_permits()
    }

    /// Configured concurrency limit.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::handler::tests::test_methods;
    use crate::websocket::hub::Hub;
    use crate::websocket::registry::ConnectionRegistry;
    use serde_json::Value;
    use std::time::Duration;
    use wsgate_rpc::{ConnectionId, ContextData, PubSub, TokioScheduler};

    fn pool(max: usize) -> (DispatchPool, queue::QueueReceiver) {
        let (tx, rx) = queue::channel();
        let handler = Arc::new(RequestHandler::new(
            Arc::new(test_methods()),
            Arc::new(TokioScheduler),
            Duration::from_secs(30),
        ));
        let hub: Arc<dyn PubSub> = Arc::new(Hub::new(Arc::new(ConnectionRegistry::new())));
        let ctx = CallContext::new(ConnectionId::from("c1"), Arc::new(ContextData::new()), hub);
        (DispatchPool::new(tx, handler, ctx, max), rx)
    }

    async fn next_response(rx: &mut queue::QueueReceiver) -> Value {
        match rx.recv().await {
            Some(QueueMessage::Response(frame)) => serde_json::from_str(&frame).unwrap(),
            other => panic!("expected response, got {other:?}"),
        }
    }

    fn sleep_request(ms: u64, tag: &str) -> String {
        format!(r#"{{"method":"sleep","data":{{"ms":{ms},"tag":"{tag}"}},"correlation_id":"{tag}"}}"#)
    }

    #[tokio::test]
    async fn responses_in_completion_order() {
        let (pool, mut rx) = pool(DEFAULT_MAX_CONCURRENCY);
        pool.dispatch(sleep_request(300, "slow"));
        pool.dispatch(sleep_request(10, "fast"));

        let first = next_response(&mut rx).await;
        let second = next_response(&mut rx).await;
        assert_eq!(first["correlation_id"], "fast");
        assert_eq!(second["correlation_id"], "slow");
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        tokio::time::pause();
        let (pool, mut rx) = pool(2);
        for tag in ["a", "b", "c"] {
            pool.dispatch(sleep_request(1000, tag));
        }
        // Let the spawned tasks acquire permits.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(pool.in_flight(), 2);

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(next_response(&mut rx).await["correlation_id"].clone());
        }
        assert_eq!(seen.len(), 3);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn every_request_answered_exactly_once() {
        let (pool, mut rx) = pool(4);
        for i in 0..20 {
            pool.dispatch(format!(r#"{{"method":"echo","data":{{"i":{i}}},"correlation_id":{i}}}"#));
        }
        let mut ids: Vec<i64> = Vec::new();
        for _ in 0..20 {
            ids.push(next_response(&mut rx).await["correlation_id"].as_i64().unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, (0..20).collect::<Vec<_>>());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn late_response_after_teardown_is_dropped() {
        let (pool, rx) = pool(1);
        drop(rx);
        pool.dispatch(sleep_request(5, "late"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn zero_limit_raised_to_one() {
        let (pool, _rx) = pool(0);
        assert_eq!(pool.max_concurrency(), 1);
        assert_eq!(pool.in_flight(), 0);
    }
}

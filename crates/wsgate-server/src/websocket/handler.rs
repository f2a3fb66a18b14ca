//! Request handling: decode, look up, check the signature, call the provider
//! through the worker bridge and encode the result frame.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use wsgate_rpc::{
    CallContext, MethodRegistry, RequestFrame, ResponseFrame, WorkerCall, WorkerOutcome,
    WorkerScheduler, call_provider, encode,
};

use crate::metrics::{RPC_ERRORS_TOTAL, RPC_REQUEST_DURATION_SECONDS, RPC_REQUESTS_TOTAL};

/// Turns one raw request frame into one serialized result frame.
pub struct RequestHandler {
    methods: Arc<MethodRegistry>,
    scheduler: Arc<dyn WorkerScheduler>,
    timeout: Duration,
}

impl RequestHandler {
    /// Create a handler over `methods`, running providers on `scheduler`.
    pub fn new(
        methods: Arc<MethodRegistry>,
        scheduler: Arc<dyn WorkerScheduler>,
        timeout: Duration,
    ) -> Self {
        Self {
            methods,
            scheduler,
            timeout,
        }
    }

    /// The method registry.
    pub fn methods(&self) -> &Arc<MethodRegistry> {
        &self.methods
    }

    /// Handle `raw` on behalf of the connection in `ctx`.
    ///
    /// Never fails: every error becomes a `success: false` result frame.
    #[instrument(skip_all, fields(connection_id = %ctx.connection_id(), method))]
    pub async fn handle(&self, raw: &str, ctx: &CallContext) -> String {
        let request = match RequestFrame::decode(raw) {
            Ok(r) => r,
            Err(err) => {
                warn!(len = raw.len(), "malformed request frame");
                counter!(RPC_ERRORS_TOTAL, "method" => "", "error_type" => err.exc_type().to_owned())
                    .increment(1);
                return encode(&ResponseFrame::failure(&err, None));
            }
        };

        let RequestFrame {
            method,
            data,
            correlation_id,
        } = request;
        let _ = tracing::Span::current().record("method", method.as_str());
        debug!(?correlation_id, "dispatching request");
        counter!(RPC_REQUESTS_TOTAL, "method" => method.clone()).increment(1);

        let start = Instant::now();
        let outcome = self.execute(&method, data, ctx).await;
        histogram!(RPC_REQUEST_DURATION_SECONDS, "method" => method.clone())
            .record(start.elapsed().as_secs_f64());

        if let Err(err) = &outcome {
            debug!(error_type = err.exc_type(), error = %err, "request failed");
            counter!(RPC_ERRORS_TOTAL, "method" => method, "error_type" => err.exc_type().to_owned())
                .increment(1);
        }
        encode(&ResponseFrame::from_outcome(outcome, correlation_id))
    }

    async fn execute(&self, method: &str, data: Value, ctx: &CallContext) -> WorkerOutcome {
        let provider = self.methods.get(method)?;
        let args = provider.signature().check(data)?;
        let call = WorkerCall {
            method: method.to_owned(),
            provider,
            context: ctx.clone(),
            args,
        };
        call_provider(self.scheduler.as_ref(), call, self.timeout).await
    }
}

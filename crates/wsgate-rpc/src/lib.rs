//! # wsgate-rpc
//!
//! Protocol layer of the wsgate WebSocket gateway.
//!
//! - JSON frame codec: request, result and event envelopes
//! - Error taxonomy serialized into the `error` field of result frames
//! - Method registry with declared call signatures
//! - Connection context, context middlewares and the pub/sub seam handlers use
//! - Worker bridge turning a completion callback into an awaited outcome

#![deny(unsafe_code)]

pub mod bridge;
pub mod context;
pub mod errors;
pub mod registry;
pub mod types;

pub use bridge::{
    CompletionCallback, TokioScheduler, WorkerCall, WorkerOutcome, WorkerScheduler, call_provider,
};
pub use context::{
    CallContext, ConnectionId, ContextData, ContextMiddleware, MiddlewareError, PubSub,
    apply_middlewares,
};
pub use errors::{RegistryError, RpcError};
pub use registry::{FnMethod, MethodRegistry, MethodSignature, RpcMethod, from_fn};
pub use types::{ErrorBody, EventFrame, MiddlewareErrorFrame, RequestFrame, ResponseFrame, encode};

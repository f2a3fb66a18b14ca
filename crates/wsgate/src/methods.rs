//! Built-in methods registered by the binary.
//!
//! `ping`, `echo` and `context` are diagnostics; `subscribe`, `unsubscribe`,
//! `subscriptions` and `broadcast` expose the hub to clients.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use wsgate_rpc::{CallContext, MethodSignature, RpcError, RpcMethod, from_fn};
use wsgate_server::GatewayBuilder;

/// Register every built-in method on `builder`.
pub fn register_all(builder: GatewayBuilder) -> GatewayBuilder {
    builder
        .method(
            "ping",
            from_fn(MethodSignature::new(), |_ctx, _args| async {
                Ok::<_, RpcError>(json!("pong"))
            }),
        )
        .method(
            "echo",
            from_fn(MethodSignature::any(), |_ctx, args| async move {
                Ok::<_, RpcError>(Value::Object(args))
            }),
        )
        .method(
            "context",
            from_fn(MethodSignature::new(), |ctx: CallContext, _args| async move {
                Ok::<_, RpcError>(Value::Object(ctx.context_data().clone()))
            }),
        )
        .method("subscribe", Subscribe)
        .method("unsubscribe", Unsubscribe)
        .method(
            "subscriptions",
            from_fn(MethodSignature::new(), |ctx: CallContext, _args| async move {
                Ok::<_, RpcError>(json!(ctx.hub().get_subscriptions(ctx.connection_id())))
            }),
        )
        .method("broadcast", Broadcast)
}

fn string_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Result<&'a str, RpcError> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::IncorrectSignature {
            message: format!("argument '{name}' must be a string"),
        })
}

/// Subscribe the calling connection to `channel`; returns its subscriptions.
struct Subscribe;

#[async_trait]
impl RpcMethod for Subscribe {
    fn signature(&self) -> MethodSignature {
        MethodSignature::new().required("channel")
    }

    async fn call(&self, ctx: CallContext, args: Map<String, Value>) -> Result<Value, RpcError> {
        let channel = string_arg(&args, "channel")?;
        ctx.hub().subscribe(ctx.connection_id(), channel)?;
        Ok(json!(ctx.hub().get_subscriptions(ctx.connection_id())))
    }
}

/// Unsubscribe the calling connection from `channel`; returns its subscriptions.
struct Unsubscribe;

#[async_trait]
impl RpcMethod for Unsubscribe {
    fn signature(&self) -> MethodSignature {
        MethodSignature::new().required("channel")
    }

    async fn call(&self, ctx: CallContext, args: Map<String, Value>) -> Result<Value, RpcError> {
        let channel = string_arg(&args, "channel")?;
        ctx.hub().unsubscribe(ctx.connection_id(), channel);
        Ok(json!(ctx.hub().get_subscriptions(ctx.connection_id())))
    }
}

/// Publish `event` with optional `data` to `channel`; returns the delivery count.
struct Broadcast;

#[async_trait]
impl RpcMethod for Broadcast {
    fn signature(&self) -> MethodSignature {
        MethodSignature::new()
            .required("channel")
            .required("event")
            .optional("data")
    }

    async fn call(&self, ctx: CallContext, args: Map<String, Value>) -> Result<Value, RpcError> {
        let channel = string_arg(&args, "channel")?;
        let event = string_arg(&args, "event")?;
        let data = args.get("data").cloned().unwrap_or(Value::Null);
        let delivered = ctx.hub().broadcast(channel, event, data);
        Ok(json!({ "delivered": delivered }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wsgate_rpc::{ConnectionId, ContextData, PubSub};
    use wsgate_server::ServerConfig;
    use wsgate_server::websocket::hub::Hub;
    use wsgate_server::websocket::queue::{self, QueueMessage, QueueReceiver};
    use wsgate_server::websocket::registry::{ConnectionEntry, ConnectionRegistry};

    struct Fixture {
        hub: Arc<Hub>,
        registry: Arc<ConnectionRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(ConnectionRegistry::new());
            Self {
                hub: Arc::new(Hub::new(Arc::clone(&registry))),
                registry,
            }
        }

        fn connect(&self, id: &str) -> (CallContext, QueueReceiver) {
            let (tx, rx) = queue::channel();
            let mut data = ContextData::new();
            let _ = data.insert("language".into(), json!("en"));
            let data = Arc::new(data);
            let _ = self.registry.register(ConnectionEntry::new(
                ConnectionId::from(id),
                Arc::clone(&data),
                tx,
            ));
            let hub: Arc<dyn PubSub> = self.hub.clone();
            (CallContext::new(ConnectionId::from(id), data, hub), rx)
        }
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn all_methods_registered() {
        let gateway = register_all(wsgate_server::Gateway::builder(ServerConfig::default()))
            .build()
            .unwrap();
        assert_eq!(
            gateway.methods().methods(),
            vec![
                "broadcast",
                "context",
                "echo",
                "ping",
                "subscribe",
                "subscriptions",
                "unsubscribe"
            ]
        );
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe() {
        let fx = Fixture::new();
        let (ctx, _rx) = fx.connect("c1");

        let out = Subscribe.call(ctx.clone(), args(json!({"channel": "b"}))).await.unwrap();
        assert_eq!(out, json!(["b"]));
        let out = Subscribe.call(ctx.clone(), args(json!({"channel": "a"}))).await.unwrap();
        assert_eq!(out, json!(["a", "b"]));

        let out = Unsubscribe.call(ctx, args(json!({"channel": "b"}))).await.unwrap();
        assert_eq!(out, json!(["a"]));
    }

    #[tokio::test]
    async fn non_string_channel_rejected() {
        let fx = Fixture::new();
        let (ctx, _rx) = fx.connect("c1");
        let err = Subscribe.call(ctx, args(json!({"channel": 5}))).await.unwrap_err();
        assert_eq!(err.exc_type(), "IncorrectSignature");
    }

    #[tokio::test]
    async fn subscribe_for_departed_connection_fails() {
        let fx = Fixture::new();
        let (ctx, _rx) = fx.connect("c1");
        let _ = fx.registry.remove(&ConnectionId::from("c1"));
        let err = Subscribe.call(ctx, args(json!({"channel": "a"}))).await.unwrap_err();
        assert_eq!(err.exc_type(), "ConnectionNotFound");
    }

    #[tokio::test]
    async fn broadcast_delivers_to_subscribers() {
        let fx = Fixture::new();
        let (alice, mut alice_rx) = fx.connect("alice");
        let (bob, _bob_rx) = fx.connect("bob");
        let _ = Subscribe.call(alice, args(json!({"channel": "news"}))).await.unwrap();

        let out = Broadcast
            .call(bob, args(json!({"channel": "news", "event": "headline", "data": {"t": 1}})))
            .await
            .unwrap();
        assert_eq!(out, json!({"delivered": 1}));

        match alice_rx.try_recv().unwrap() {
            QueueMessage::Push(frame) => {
                let frame: Value = serde_json::from_str(&frame).unwrap();
                assert_eq!(frame["event"], "headline");
                assert_eq!(frame["data"], json!({"t": 1}));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

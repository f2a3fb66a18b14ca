//! `Gateway`: composition root and Axum HTTP + WebSocket server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::header::ACCEPT_LANGUAGE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use wsgate_rpc::{
    ConnectionId, ContextData, ContextMiddleware, MethodRegistry, RegistryError, RpcMethod,
    TokioScheduler, WorkerScheduler,
};

use crate::config::ServerConfig;
use crate::error::GatewayError;
use crate::health::{self, HealthCounts, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::handler::RequestHandler;
use crate::websocket::heartbeat::Heartbeat;
use crate::websocket::hub::Hub;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::{self, SessionDeps};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
struct AppState {
    session: SessionDeps,
    config: Arc<ServerConfig>,
    start_time: Instant,
    started_at: DateTime<Utc>,
    metrics: Option<PrometheusHandle>,
}

/// Assembles a [`Gateway`] from methods, middlewares and a worker scheduler.
pub struct GatewayBuilder {
    config: ServerConfig,
    methods: MethodRegistry,
    middlewares: Vec<Arc<dyn ContextMiddleware>>,
    scheduler: Arc<dyn WorkerScheduler>,
    metrics: Option<PrometheusHandle>,
    registration_error: Option<RegistryError>,
}

impl GatewayBuilder {
    /// Start a builder with `config`, no methods and the tokio scheduler.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            methods: MethodRegistry::new(),
            middlewares: Vec::new(),
            scheduler: Arc::new(TokioScheduler),
            metrics: None,
            registration_error: None,
        }
    }

    /// Register a method provider. A duplicate name fails [`build`](Self::build).
    #[must_use]
    pub fn method(mut self, name: &str, provider: impl RpcMethod + 'static) -> Self {
        if self.registration_error.is_none() {
            if let Err(err) = self.methods.register(name, provider) {
                self.registration_error = Some(err);
            }
        }
        self
    }

    /// Append a context middleware. Middlewares run in the order added.
    #[must_use]
    pub fn middleware(mut self, middleware: impl ContextMiddleware + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Run providers on `scheduler` instead of plain tokio tasks.
    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn WorkerScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Serve `GET /metrics` from `handle`.
    #[must_use]
    pub fn metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Finish building.
    pub fn build(self) -> Result<Gateway, GatewayError> {
        if let Some(err) = self.registration_error {
            return Err(err.into());
        }
        let connections = Arc::new(ConnectionRegistry::new());
        let hub = Arc::new(Hub::new(Arc::clone(&connections)));
        let handler = Arc::new(RequestHandler::new(
            Arc::new(self.methods),
            self.scheduler,
            self.config.handler_timeout,
        ));
        info!(
            methods = handler.methods().len(),
            middlewares = self.middlewares.len(),
            "gateway built"
        );
        Ok(Gateway {
            connections,
            hub,
            handler,
            middlewares: self.middlewares.into(),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics: self.metrics,
            start_time: Instant::now(),
            started_at: Utc::now(),
            config: self.config,
        })
    }
}

/// The WebSocket gateway.
pub struct Gateway {
    config: ServerConfig,
    connections: Arc<ConnectionRegistry>,
    hub: Arc<Hub>,
    handler: Arc<RequestHandler>,
    middlewares: Arc<[Arc<dyn ContextMiddleware>]>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
    started_at: DateTime<Utc>,
}

impl Gateway {
    /// Start building a gateway.
    pub fn builder(config: ServerConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            session: SessionDeps {
                connections: Arc::clone(&self.connections),
                hub: Arc::clone(&self.hub),
                handler: Arc::clone(&self.handler),
                middlewares: Arc::clone(&self.middlewares),
                max_concurrency: self.config.max_concurrency,
                max_pending_pushes: self.config.max_pending_pushes,
                heartbeat: Heartbeat {
                    interval: self.config.ping_interval,
                    timeout: self.config.pong_timeout,
                },
                shutdown: self.shutdown.token(),
            },
            config: Arc::new(self.config.clone()),
            start_time: self.start_time,
            started_at: self.started_at,
            metrics: self.metrics.clone(),
        };

        let mut router = Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler));
        if self.metrics.is_some() {
            router = router.route("/metrics", get(metrics_handler));
        }
        router.layer(TraceLayer::new_for_http()).with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the server task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), GatewayError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%local_addr, "gateway listening");
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
            info!("gateway stopped");
        });
        Ok((local_addr, handle))
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the pub/sub hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Get the connection registry.
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the method registry.
    pub fn methods(&self) -> &Arc<MethodRegistry> {
        self.handler.methods()
    }
}

/// Initial context data for a connection, derived from the upgrade request.
///
/// `accept-language` becomes `language`; every header starting with `prefix`
/// becomes a key with the prefix stripped and `-` replaced by `_`; the query
/// arguments are stored as an object under `request_args`.
pub fn initial_context(
    headers: &HeaderMap,
    args: HashMap<String, String>,
    prefix: &str,
) -> ContextData {
    let prefix = prefix.to_ascii_lowercase();
    let mut context = ContextData::new();

    if let Some(language) = headers.get(ACCEPT_LANGUAGE).and_then(|v| v.to_str().ok()) {
        let _ = context.insert("language".into(), Value::String(language.to_owned()));
    }
    for (name, value) in headers {
        let Some(key) = name.as_str().strip_prefix(prefix.as_str()) else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        if let Ok(value) = value.to_str() {
            let _ = context.insert(key.replace('-', "_"), Value::String(value.to_owned()));
        }
    }
    let args = args
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    let _ = context.insert("request_args".into(), Value::Object(args));
    context
}

/// GET /ws
async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(args): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let active = state.session.connections.len();
    if active >= state.config.max_connections {
        warn!(
            active,
            max = state.config.max_connections,
            "connection limit reached, refusing upgrade"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }

    let context = initial_context(&headers, args, &state.config.header_prefix);
    let deps = state.session.clone();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let (sink, source) = socket.split();
            session::run_session(source, sink, ConnectionId::new(), context, deps).await;
        })
        .into_response()
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let hub = &state.session.hub;
    let counts = HealthCounts {
        connections: state.session.connections.len(),
        subscriptions: hub.subscription_count(),
        channels: hub.channel_count(),
    };
    Json(health::health_check(state.start_time, state.started_at, counts))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state
        .metrics
        .as_ref()
        .map_or_else(String::new, PrometheusHandle::render)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{HeaderValue, Request};
    use serde_json::json;
    use tower::ServiceExt;
    use wsgate_rpc::{MethodSignature, RpcError, from_fn};

    fn ping() -> impl RpcMethod {
        from_fn(MethodSignature::new(), |_ctx, _args| async move {
            Ok::<_, RpcError>(json!("pong"))
        })
    }

    fn make_gateway() -> Gateway {
        Gateway::builder(ServerConfig::default())
            .method("ping", ping())
            .build()
            .unwrap()
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[test]
    fn duplicate_method_fails_build() {
        let result = Gateway::builder(ServerConfig::default())
            .method("ping", ping())
            .method("ping", ping())
            .build();
        assert!(matches!(result, Err(GatewayError::Registry(_))));
    }

    #[test]
    fn methods_registered() {
        let gateway = make_gateway();
        assert_eq!(gateway.methods().methods(), vec!["ping"]);
        assert!(!gateway.shutdown().is_shutting_down());
        assert!(gateway.connections().is_empty());
        assert_eq!(gateway.hub().channel_count(), 0);
        assert_eq!(gateway.config().port, 0);
    }

    #[tokio::test]
    async fn health_endpoint_reports_counts() {
        let gateway = make_gateway();
        let (status, body) = get_json(gateway.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["subscriptions"], 0);
        assert_eq!(body["channels"], 0);
        assert!(body["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn ws_without_upgrade_is_rejected() {
        let gateway = make_gateway();
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = gateway.router().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn ws_post_is_method_not_allowed() {
        let gateway = make_gateway();
        let req = Request::builder()
            .method("POST")
            .uri("/ws")
            .body(Body::empty())
            .unwrap();
        let resp = gateway.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn metrics_route_only_with_handle() {
        let gateway = make_gateway();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = gateway.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let gateway = Gateway::builder(ServerConfig::default())
            .metrics(handle)
            .build()
            .unwrap();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = gateway.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn context_from_headers_and_query() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-GB"));
        let _ = headers.insert("wsgate-user-id", HeaderValue::from_static("42"));
        let _ = headers.insert("wsgate-", HeaderValue::from_static("ignored"));
        let _ = headers.insert("x-other", HeaderValue::from_static("skip"));
        let mut args = HashMap::new();
        let _ = args.insert("token".to_string(), "abc".to_string());

        let ctx = initial_context(&headers, args, "WSGATE-");
        assert_eq!(ctx["language"], "en-GB");
        assert_eq!(ctx["user_id"], "42");
        assert_eq!(ctx["request_args"], json!({"token": "abc"}));
        assert!(!ctx.contains_key("x_other"));
        assert!(!ctx.contains_key(""));
        assert_eq!(ctx.len(), 3);
    }

    #[test]
    fn context_without_headers_has_empty_args() {
        let ctx = initial_context(&HeaderMap::new(), HashMap::new(), "wsgate-");
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx["request_args"], json!({}));
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops() {
        let gateway = make_gateway();
        let (addr, handle) = gateway.listen().await.unwrap();
        assert_ne!(addr.port(), 0);

        gateway.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

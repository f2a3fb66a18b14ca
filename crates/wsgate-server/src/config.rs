//! Server configuration.

use std::time::Duration;

use wsgate_settings::GatewaySettings;

/// Configuration for the gateway server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Request headers with this prefix are copied into context data.
    pub header_prefix: String,
    /// Concurrent in-flight requests per connection.
    pub max_concurrency: usize,
    /// Upper bound on a single handler invocation.
    pub handler_timeout: Duration,
    /// Hub pushes allowed to wait in one connection's queue.
    pub max_pending_pushes: usize,
    /// Time between heartbeat pings.
    pub ping_interval: Duration,
    /// Silence after which a client is disconnected.
    pub pong_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            max_message_size: 1024 * 1024, // 1 MB
            header_prefix: "wsgate-".into(),
            max_concurrency: 10,
            handler_timeout: Duration::from_secs(60),
            max_pending_pushes: 256,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&GatewaySettings> for ServerConfig {
    fn from(settings: &GatewaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_connections: settings.server.max_connections,
            max_message_size: settings.server.max_message_size,
            header_prefix: settings.server.header_prefix.to_ascii_lowercase(),
            max_concurrency: settings.dispatch.max_concurrency.max(1),
            handler_timeout: Duration::from_millis(settings.dispatch.handler_timeout_ms),
            max_pending_pushes: settings.server.max_pending_pushes.max(1),
            ping_interval: Duration::from_millis(settings.server.ping_interval_ms),
            pong_timeout: Duration::from_millis(settings.server.pong_timeout_ms),
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

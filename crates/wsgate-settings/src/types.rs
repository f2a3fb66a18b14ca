//! Settings type definitions.
//!
//! All types use camelCase JSON field names and `#[serde(default)]`, so a
//! partial settings file only overrides the fields it names.

use serde::{Deserialize, Serialize};

/// Root settings type for the gateway.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Network and connection limits.
    pub server: ServerSettings,
    /// Per-connection request dispatch.
    pub dispatch: DispatchSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

/// Server network settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Request headers starting with this prefix become context data.
    pub header_prefix: String,
    /// Hub pushes allowed to wait in one connection's queue before new ones
    /// are dropped.
    pub max_pending_pushes: usize,
    /// Time between heartbeat pings, in milliseconds.
    pub ping_interval_ms: u64,
    /// Silence after which a client is disconnected, in milliseconds.
    pub pong_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_connections: 1024,
            max_message_size: 1024 * 1024,
            header_prefix: "wsgate-".to_string(),
            max_pending_pushes: 256,
            ping_interval_ms: 30_000,
            pong_timeout_ms: 60_000,
        }
    }
}

/// Request dispatch settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchSettings {
    /// Concurrent in-flight requests per connection.
    pub max_concurrency: usize,
    /// How long a handler may run before the request fails, in milliseconds.
    pub handler_timeout_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            handler_timeout_ms: 60_000,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `tracing` filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

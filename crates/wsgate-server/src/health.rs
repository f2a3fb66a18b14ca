//! `/health` endpoint.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// When the server started (RFC 3339).
    pub started_at: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered WebSocket connections.
    pub connections: usize,
    /// Total (connection, channel) subscription pairs.
    pub subscriptions: usize,
    /// Channels with at least one subscriber.
    pub channels: usize,
}

/// Live counters reported by `/health`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthCounts {
    /// Registered connections.
    pub connections: usize,
    /// Subscription pairs.
    pub subscriptions: usize,
    /// Non-empty channels.
    pub channels: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    started_at: DateTime<Utc>,
    counts: HealthCounts,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        started_at: started_at.to_rfc3339(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: counts.connections,
        subscriptions: counts.subscriptions,
        channels: counts.channels,
    }
}

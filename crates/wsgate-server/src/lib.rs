//! # wsgate-server
//!
//! Axum HTTP + `WebSocket` gateway.
//!
//! - Per-connection pipeline: reader task, bounded dispatch pool and a
//!   single-writer mainloop sharing one ordered queue
//! - Process-wide connection registry and pub/sub hub
//! - HTTP endpoints: `/ws`, `/health`, optional `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use error::GatewayError;
pub use server::{Gateway, GatewayBuilder};

//! Ping/pong liveness for a connection.
//!
//! The reader marks the connection alive on every inbound frame, control
//! frames included. The mainloop pings on each tick and gives up on a peer
//! that has been silent for longer than the timeout.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Last time the peer was heard from.
#[derive(Debug)]
pub struct Liveness {
    last_seen: Mutex<Instant>,
}

impl Liveness {
    /// Start counting from now.
    pub fn new() -> Self {
        Self {
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// Record inbound activity.
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound activity.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Ping cadence and the silence after which a peer is dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Heartbeat {
    /// Time between pings.
    pub interval: Duration,
    /// Silence after which the connection is closed.
    pub timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(60),
        }
    }
}

impl Heartbeat {
    /// Ping ticker whose first tick fires one interval from now.
    pub fn ticker(&self) -> Interval {
        let period = self.interval.max(Duration::from_millis(1));
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Whether `liveness` has been silent past the timeout.
    pub fn expired(&self, liveness: &Liveness) -> bool {
        liveness.idle_for() > self.timeout
    }
}

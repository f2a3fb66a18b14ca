//! Per-connection pipeline and shared connection state.
//!
//! Each accepted socket gets one [`reader`] task feeding an ordered queue, a
//! [`dispatch`] pool executing requests concurrently, and one [`session`]
//! mainloop that drains the queue and is the only writer to the socket.

pub mod dispatch;
pub mod handler;
pub mod heartbeat;
pub mod hub;
pub mod queue;
pub mod reader;
pub mod registry;
pub mod session;
pub mod socket;

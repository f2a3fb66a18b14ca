//! Reader task: turns socket reads into queue messages.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use super::heartbeat::Liveness;
use super::queue::{self, QueueMessage, QueueSender};
use super::socket::{FrameSource, Inbound};

/// Spawn the reader for one connection.
///
/// Aborting the returned handle mid-read is safe.
pub fn spawn_reader<S: FrameSource>(
    source: S,
    queue: QueueSender,
    liveness: Arc<Liveness>,
) -> JoinHandle<()> {
    tokio::spawn(run_reader(source, queue, liveness))
}

/// Forward every inbound text frame as [`QueueMessage::Request`]; on end of
/// stream enqueue [`QueueMessage::Closed`] and stop. Any frame counts as
/// liveness.
pub async fn run_reader<S: FrameSource>(mut source: S, queue: QueueSender, liveness: Arc<Liveness>) {
    while let Some(frame) = source.next_frame().await {
        liveness.mark_alive();
        let Inbound::Text(raw) = frame else { continue };
        if !queue::enqueue(&queue, QueueMessage::Request(raw)) {
            debug!("queue closed, reader stopping");
            return;
        }
    }
    debug!("peer closed, reader stopping");
    let _ = queue::enqueue(&queue, QueueMessage::Closed);
}

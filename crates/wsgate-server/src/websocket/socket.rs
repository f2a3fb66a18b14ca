//! Socket halves seen by the pipeline.
//!
//! The reader only needs "next frame or end of stream"; the mainloop only
//! needs to write text, ping and close. Both are traits so the pipeline runs
//! the same over an axum socket and over in-memory channels.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tracing::debug;

use crate::error::GatewayError;

/// One frame read from the peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// Text payload (or a UTF-8 binary frame).
    Text(String),
    /// Ping, pong or undecodable binary: proof of life, nothing to handle.
    Control,
}

/// Inbound half of a socket.
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Await the next frame. `None` means the peer is gone.
    async fn next_frame(&mut self) -> Option<Inbound>;
}

/// Outbound half of a socket.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one text frame.
    async fn send_text(&mut self, frame: String) -> Result<(), GatewayError>;
    /// Write a ping control frame.
    async fn send_ping(&mut self) -> Result<(), GatewayError>;
    /// Send a close frame and flush. Errors are ignored.
    async fn close_socket(&mut self);
}

#[async_trait]
impl FrameSource for SplitStream<WebSocket> {
    async fn next_frame(&mut self) -> Option<Inbound> {
        match self.next().await? {
            Ok(Message::Text(text)) => Some(Inbound::Text(text.as_str().to_owned())),
            Ok(Message::Binary(data)) => {
                if let Ok(text) = std::str::from_utf8(&data) {
                    return Some(Inbound::Text(text.to_owned()));
                }
                debug!(len = data.len(), "skipping non-UTF8 binary frame");
                Some(Inbound::Control)
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => Some(Inbound::Control),
            Ok(Message::Close(_)) => None,
            Err(e) => {
                debug!(error = %e, "socket read failed");
                None
            }
        }
    }
}

#[async_trait]
impl FrameSink for SplitSink<WebSocket, Message> {
    async fn send_text(&mut self, frame: String) -> Result<(), GatewayError> {
        self.send(Message::Text(frame.into()))
            .await
            .map_err(|e| GatewayError::Socket(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), GatewayError> {
        self.send(Message::Ping(Vec::new().into()))
            .await
            .map_err(|e| GatewayError::Socket(e.to_string()))
    }

    async fn close_socket(&mut self) {
        let _ = self.send(Message::Close(None)).await;
        let _ = SinkExt::close(self).await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory socket halves for pipeline tests.

    use super::*;
    use tokio::sync::mpsc;

    /// What the server side did to the fake socket.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Written {
        Text(String),
        Ping,
        Close,
    }

    /// Inbound frames come from a channel; dropping the sender ends the stream.
    pub struct ChannelSource(pub mpsc::UnboundedReceiver<String>);

    #[async_trait]
    impl FrameSource for ChannelSource {
        async fn next_frame(&mut self) -> Option<Inbound> {
            self.0.recv().await.map(Inbound::Text)
        }
    }

    /// Every write is recorded on a channel. `fail_writes` simulates a dead peer.
    pub struct ChannelSink {
        pub out: mpsc::UnboundedSender<Written>,
        pub fail_writes: bool,
    }

    #[async_trait]
    impl FrameSink for ChannelSink {
        async fn send_text(&mut self, frame: String) -> Result<(), GatewayError> {
            if self.fail_writes {
                return Err(GatewayError::Socket("broken pipe".into()));
            }
            let _ = self.out.send(Written::Text(frame));
            Ok(())
        }

        async fn send_ping(&mut self) -> Result<(), GatewayError> {
            if self.fail_writes {
                return Err(GatewayError::Socket("broken pipe".into()));
            }
            let _ = self.out.send(Written::Ping);
            Ok(())
        }

        async fn close_socket(&mut self) {
            let _ = self.out.send(Written::Close);
        }
    }

    /// Records writes like [`ChannelSink`] but never finishes closing, like a
    /// peer that stopped reading.
    pub struct StuckCloseSink(pub ChannelSink);

    #[async_trait]
    impl FrameSink for StuckCloseSink {
        async fn send_text(&mut self, frame: String) -> Result<(), GatewayError> {
            self.0.send_text(frame).await
        }

        async fn send_ping(&mut self) -> Result<(), GatewayError> {
            self.0.send_ping().await
        }

        async fn close_socket(&mut self) {
            std::future::pending::<()>().await;
        }
    }

    /// A connected pair of fake socket halves plus the client-side ends.
    pub fn pair() -> (
        ChannelSource,
        ChannelSink,
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<Written>,
    ) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            ChannelSource(in_rx),
            ChannelSink {
                out: out_tx,
                fail_writes: false,
            },
            in_tx,
            out_rx,
        )
    }
}

//! Gateway-level errors (server I/O, socket writes, builder validation).

use wsgate_rpc::RegistryError;

/// Errors raised while building or running the gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A frame could not be written to the socket.
    #[error("socket write failed: {0}")]
    Socket(String),

    /// Method registration failed while building the gateway.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Other I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

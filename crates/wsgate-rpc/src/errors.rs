//! RPC error kinds and error type.

use crate::types::ErrorBody;

// ── Error kind constants ────────────────────────────────────────────

/// Frame is not a valid request envelope.
pub const MALFORMED_REQUEST: &str = "MalformedRequest";
/// No provider registered for the requested method.
pub const METHOD_NOT_FOUND: &str = "MethodNotFound";
/// Arguments do not match the provider's declared signature.
pub const INCORRECT_SIGNATURE: &str = "IncorrectSignature";
/// Hub operation referenced a connection that is no longer registered.
pub const CONNECTION_NOT_FOUND: &str = "ConnectionNotFound";
/// Worker did not complete within the handler timeout.
pub const TIMEOUT: &str = "Timeout";
/// Worker finished without delivering an outcome.
pub const WORKER_LOST: &str = "WorkerLost";

/// Error type returned by request handling and by method providers.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Envelope could not be decoded.
    #[error("{message}")]
    MalformedRequest {
        /// Why decoding failed.
        message: String,
    },

    /// Method name has no registered provider.
    #[error("{method}")]
    MethodNotFound {
        /// The requested method.
        method: String,
    },

    /// Arguments rejected by the provider's signature.
    #[error("{message}")]
    IncorrectSignature {
        /// What is wrong with the arguments.
        message: String,
    },

    /// Connection id absent from the connection registry.
    #[error("{connection_id}")]
    ConnectionNotFound {
        /// The missing connection.
        connection_id: String,
    },

    /// Failure raised by handler business logic.
    #[error("{message}")]
    Handler {
        /// Handler-chosen error kind.
        exc_type: String,
        /// Human-readable message.
        message: String,
        /// Optional structured details.
        details: Option<serde_json::Value>,
    },

    /// Worker exceeded the handler timeout.
    #[error("handler for '{method}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Method being executed.
        method: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// Worker dropped its completion callback without calling it.
    #[error("worker for '{method}' finished without reporting a result")]
    WorkerLost {
        /// Method being executed.
        method: String,
    },
}

impl RpcError {
    /// Shorthand for a handler-raised error.
    pub fn handler(exc_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            exc_type: exc_type.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Error kind reported as `exc_type` on the wire.
    pub fn exc_type(&self) -> &str {
        match self {
            Self::MalformedRequest { .. } => MALFORMED_REQUEST,
            Self::MethodNotFound { .. } => METHOD_NOT_FOUND,
            Self::IncorrectSignature { .. } => INCORRECT_SIGNATURE,
            Self::ConnectionNotFound { .. } => CONNECTION_NOT_FOUND,
            Self::Handler { exc_type, .. } => exc_type,
            Self::Timeout { .. } => TIMEOUT,
            Self::WorkerLost { .. } => WORKER_LOST,
        }
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            exc_type: self.exc_type().to_owned(),
            value: self.to_string(),
            details: match self {
                Self::Handler { details, .. } => details.clone(),
                _ => None,
            },
        }
    }
}

/// Errors raised while assembling a method registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A provider is already registered under this name.
    #[error("method '{0}' is already registered")]
    DuplicateMethod(String),
}

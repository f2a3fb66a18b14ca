//! Wire-format frames exchanged over the socket.
//!
//! Client → server: `{"method", "data"?, "correlation_id"?}`.
//! Server → client: result frames (`"type": "result"`) and unsolicited event
//! frames (`"type": "event"`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::RpcError;

/// Message used when a frame cannot be decoded as a request envelope.
const INVALID_JSON: &str = "Invalid JSON data";

/// Decoded request envelope.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestFrame {
    /// Method name to dispatch to.
    pub method: String,
    /// Call arguments. Missing or empty values normalize to `{}`.
    pub data: Value,
    /// Client token echoed in the matching result frame.
    pub correlation_id: Option<Value>,
}

impl RequestFrame {
    /// Decode a raw text frame.
    ///
    /// Any failure, including a missing or non-string `method`, yields
    /// `MalformedRequest`; no correlation id is recovered in that case.
    pub fn decode(raw: &str) -> Result<Self, RpcError> {
        let malformed = || RpcError::MalformedRequest {
            message: INVALID_JSON.to_owned(),
        };
        let Value::Object(mut obj) = serde_json::from_str::<Value>(raw).map_err(|_| malformed())?
        else {
            return Err(malformed());
        };
        let Some(Value::String(method)) = obj.remove("method") else {
            return Err(malformed());
        };
        let data = match obj.remove("data") {
            Some(v) if !is_falsy(&v) => v,
            _ => Value::Object(Map::new()),
        };
        let correlation_id = obj.remove("correlation_id").filter(|v| !v.is_null());
        Ok(Self {
            method,
            data,
            correlation_id,
        })
    }
}

/// JSON values a client may send to mean "no arguments".
fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Structured error inside a failed result frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error kind (e.g. `MethodNotFound`).
    pub exc_type: String,
    /// Human-readable message.
    pub value: String,
    /// Optional structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Result frame answering one request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Always `"result"`.
    #[serde(rename = "type")]
    pub frame_type: String,
    /// Whether the call succeeded.
    pub success: bool,
    /// Handler return value (present when `success == true`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Failure descriptor (present when `success == false`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// Echoed correlation token, `null` when none was parsed.
    pub correlation_id: Option<Value>,
}

impl ResponseFrame {
    /// Build a success frame.
    pub fn success(result: Value, correlation_id: Option<Value>) -> Self {
        Self {
            frame_type: "result".into(),
            success: true,
            data: Some(result),
            error: None,
            correlation_id,
        }
    }

    /// Build a failure frame from an error.
    pub fn failure(err: &RpcError, correlation_id: Option<Value>) -> Self {
        Self {
            frame_type: "result".into(),
            success: false,
            data: None,
            error: Some(err.to_error_body()),
            correlation_id,
        }
    }

    /// Build from a handler outcome.
    pub fn from_outcome(outcome: Result<Value, RpcError>, correlation_id: Option<Value>) -> Self {
        match outcome {
            Ok(value) => Self::success(value, correlation_id),
            Err(err) => Self::failure(&err, correlation_id),
        }
    }
}

/// Unsolicited server-pushed event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventFrame {
    /// Always `"event"`.
    #[serde(rename = "type")]
    pub frame_type: String,
    /// Event name.
    pub event: String,
    /// Event payload.
    pub data: Value,
}

impl EventFrame {
    /// Create an event frame.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            frame_type: "event".into(),
            event: event.into(),
            data,
        }
    }

    /// The `connected` event sent once a connection is registered.
    pub fn connected(socket_id: &str) -> Self {
        Self::new("connected", serde_json::json!({ "socket_id": socket_id }))
    }
}

/// Frame sent instead of `connected` when a context middleware fails.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MiddlewareErrorFrame {
    /// Always `"Middleware Exception"`.
    pub error: String,
    /// Middleware failure message.
    pub data: String,
}

impl MiddlewareErrorFrame {
    /// Create the frame for a middleware failure message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: "Middleware Exception".into(),
            data: message.into(),
        }
    }
}

/// Serialize a frame to its text form.
///
/// Frame types serialize infallibly in practice; a failure is logged and
/// yields an empty string rather than tearing down the connection.
pub fn encode<T: Serialize>(frame: &T) -> String {
    serde_json::to_string(frame).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to serialize frame");
        String::new()
    })
}

//! # RPC Message Envelope
//!
//! The three message kinds a connection exchanges with the broker:
//!
//! - **Request**: `path:method(param)` with a request id chosen by the caller.
//! - **Response**: result or error for a request id.
//! - **Signal**: an unsolicited event `path:source:signal(param)`.
//!
//! `hello` and `login` are ordinary requests on the root path `""`.

use crate::{AccessLevel, RpcError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Request id, scoped to the connection that issued it.
pub type RequestId = i64;

/// Broker-assigned client id of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single framed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RpcMessage {
    Request(RpcRequest),
    Response(RpcResponse),
    Signal(RpcSignal),
}

/// Method call request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    pub request_id: RequestId,
    #[serde(default)]
    pub path: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<Value>,
    /// Chain of `user:broker` entries, filled in by brokers on the way.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Access level the broker granted to the caller. Ignored on input from
    /// clients; set by the broker before forwarding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessLevel>,
}

impl RpcRequest {
    /// Create a request without parameter
    pub fn new(request_id: RequestId, path: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            request_id,
            path: path.into(),
            method: method.into(),
            param: None,
            user_id: None,
            access: None,
        }
    }

    /// Attach a parameter
    pub fn with_param(mut self, param: Value) -> Self {
        self.param = Some(param);
        self
    }
}

/// Response to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcResponse {
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Successful response
    pub fn success(request_id: RequestId, result: Value) -> Self {
        Self {
            request_id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response
    pub fn error(request_id: RequestId, error: RpcError) -> Self {
        Self {
            request_id,
            result: None,
            error: Some(error),
        }
    }

    /// Build from a handler result
    pub fn from_result(request_id: RequestId, result: Result<Value, RpcError>) -> Self {
        match result {
            Ok(value) => Self::success(request_id, value),
            Err(err) => Self::error(request_id, err),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

fn default_source() -> String {
    "get".to_string()
}

fn default_signal() -> String {
    "chng".to_string()
}

/// Unsolicited event emitted by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcSignal {
    #[serde(default)]
    pub path: String,
    /// Method the signal is associated with (`get` for value changes).
    #[serde(default = "default_source")]
    pub source: String,
    /// Signal name (`chng` for value changes).
    #[serde(default = "default_signal")]
    pub signal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<Value>,
    /// Minimal access level a subscriber needs to receive this signal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl RpcSignal {
    /// Create a signal with default READ access
    pub fn new(
        path: impl Into<String>,
        source: impl Into<String>,
        signal: impl Into<String>,
        param: Option<Value>,
    ) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
            signal: signal.into(),
            param,
            access: None,
            user_id: None,
        }
    }

    /// Access level required to receive the signal.
    pub fn required_access(&self) -> AccessLevel {
        self.access.unwrap_or(AccessLevel::Read)
    }
}

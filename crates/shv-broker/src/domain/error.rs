//! Broker error taxonomy and its mapping onto RPC error responses.

use shv_types::{codes, RpcError};
use thiserror::Error;

use super::ri::RiError;

/// Errors raised while handling a message for one connection.
///
/// None of these is fatal to the broker; each is scoped to a single request
/// or a single connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Malformed frame. The connection is dropped.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Request before a completed login.
    #[error("{0}")]
    LoginRequired(&'static str),

    /// Bad credentials. The handshake is rejected.
    #[error("Invalid login")]
    Auth,

    /// Insufficient access level. Reported to callers as `NotFound`.
    #[error("Access denied for {path}:{method}")]
    AccessDenied { path: String, method: String },

    /// No such path or method.
    #[error("No such path '{path}' or method '{method}'")]
    NotFound { path: String, method: String },

    /// Mount point rejected by role or overlapping another mount.
    #[error("{0}")]
    MountConflict(MountError),

    /// Argument failed local validation.
    #[error("Invalid param: {0}")]
    InvalidParam(String),

    /// Target connection vanished while a forwarded call was outstanding.
    #[error("Connection closed: client {0} disconnected")]
    ForwardFailure(u32),

    /// Forwarded call outlived the forward timeout.
    #[error("Forwarded call timed out")]
    ForwardTimeout,
}

/// Why a mount was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MountError {
    #[error("Mount point not allowed")]
    NotAllowed,

    #[error("Mount point already exists")]
    AlreadyMounted,
}

impl From<MountError> for BrokerError {
    fn from(err: MountError) -> Self {
        BrokerError::MountConflict(err)
    }
}

impl From<RiError> for BrokerError {
    fn from(err: RiError) -> Self {
        BrokerError::InvalidParam(err.to_string())
    }
}

impl BrokerError {
    /// Shorthand for [`BrokerError::NotFound`].
    pub fn not_found(path: &str, method: &str) -> Self {
        BrokerError::NotFound {
            path: path.to_string(),
            method: method.to_string(),
        }
    }

    /// Shorthand for [`BrokerError::AccessDenied`].
    pub fn access_denied(path: &str, method: &str) -> Self {
        BrokerError::AccessDenied {
            path: path.to_string(),
            method: method.to_string(),
        }
    }
}

impl From<BrokerError> for RpcError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::AccessDenied { path, method } | BrokerError::NotFound { path, method } => {
                RpcError::method_not_found(&path, &method)
            }
            BrokerError::InvalidParam(details) => RpcError::invalid_param(details),
            BrokerError::LoginRequired(msg) => RpcError::login_required(msg),
            BrokerError::Protocol(details) => RpcError::new(codes::INVALID_REQUEST, details),
            BrokerError::ForwardTimeout => RpcError::method_call_timeout("Forwarded call timed out"),
            other => RpcError::method_call_exception(other.to_string()),
        }
    }
}

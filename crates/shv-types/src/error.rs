//! RPC error values carried in responses, with SHV error codes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Standard SHV RPC error codes
pub mod codes {
    pub const NO_ERROR: i32 = 0;
    pub const INTERNAL_ERROR: i32 = 1;
    pub const METHOD_NOT_FOUND: i32 = 2;
    pub const INVALID_PARAM: i32 = 3;
    pub const INVALID_REQUEST: i32 = 4;
    pub const PARSE_ERROR: i32 = 5;
    pub const METHOD_CALL_TIMEOUT: i32 = 6;
    pub const METHOD_CALL_CANCELLED: i32 = 7;
    pub const METHOD_CALL_EXCEPTION: i32 = 8;
    pub const LOGIN_REQUIRED: i32 = 10;
    pub const USER_ID_REQUIRED: i32 = 11;
    pub const NOT_IMPLEMENTED: i32 = 12;
}

/// Error payload of an RPC response.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message} (code {code})")]
pub struct RpcError {
    /// One of [`codes`]
    pub code: i32,
    /// Human readable message
    pub message: String,
}

impl RpcError {
    /// Create a new RPC error
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Method not found. Also used for access denial so that restricted
    /// nodes look exactly like absent ones.
    pub fn method_not_found(path: &str, method: &str) -> Self {
        Self::new(
            codes::METHOD_NOT_FOUND,
            format!("No such path '{}' or method '{}' or access rights.", path, method),
        )
    }

    /// Invalid parameter
    pub fn invalid_param(details: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAM, details)
    }

    /// Invalid request, e.g. a request without a method
    pub fn invalid_request(details: impl Into<String>) -> Self {
        Self::new(codes::INVALID_REQUEST, details)
    }

    /// Method call failed on the callee side
    pub fn method_call_exception(details: impl Into<String>) -> Self {
        Self::new(codes::METHOD_CALL_EXCEPTION, details)
    }

    /// Forwarded call timed out
    pub fn method_call_timeout(details: impl Into<String>) -> Self {
        Self::new(codes::METHOD_CALL_TIMEOUT, details)
    }

    /// Any request other than hello/login before authentication
    pub fn login_required(details: impl Into<String>) -> Self {
        Self::new(codes::LOGIN_REQUIRED, details)
    }

    /// Method requires a user id but the request carries none
    pub fn user_id_required() -> Self {
        Self::new(codes::USER_ID_REQUIRED, "User ID is required")
    }

    /// Known method without an implementation
    pub fn not_implemented(method: &str) -> Self {
        Self::new(
            codes::NOT_IMPLEMENTED,
            format!("Method '{}' is not implemented", method),
        )
    }

    /// Internal error
    pub fn internal(details: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_not_found_hides_reason() {
        let err = RpcError::method_not_found(".broker", "clients");
        assert_eq!(err.code, codes::METHOD_NOT_FOUND);
        assert!(err.message.contains(".broker"));
        assert!(err.message.contains("access rights"));
    }

    #[test]
    fn test_display_contains_code() {
        let err = RpcError::invalid_param("Expected string");
        assert_eq!(err.to_string(), "Expected string (code 3)");
    }
}

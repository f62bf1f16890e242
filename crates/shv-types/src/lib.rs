//! # SHV Types Crate
//!
//! Value types exchanged between the broker core and the transport layer.
//!
//! ## Design Principles
//!
//! - **Codec agnostic**: every type is serde-derived; the byte format is chosen
//!   by the transport, not here.
//! - **Access levels are ordered**: `AccessLevel` derives `Ord`, so
//!   "at least READ" is a plain comparison.
//! - **Errors travel as values**: `RpcError` is what a caller receives in a
//!   response, never a Rust panic or a dropped frame.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod access;
pub mod error;
pub mod message;

pub use access::{AccessLevel, ParseAccessLevelError};
pub use error::{codes, RpcError};
pub use message::{ConnectionId, RequestId, RpcMessage, RpcRequest, RpcResponse, RpcSignal};

/// Major version of the SHV protocol spoken by this crate.
pub const SHV_VERSION_MAJOR: i64 = 3;

/// Minor version of the SHV protocol spoken by this crate.
pub const SHV_VERSION_MINOR: i64 = 0;

//! # Broker Runtime
//!
//! Runs the transport-free broker core on tokio sockets. The `shvbroker`
//! binary in `main.rs` is a thin shell over this library so the listeners
//! and connection handling can be tested end to end.
//!
//! ## Data flow
//!
//! ```text
//! socket ──lines──► serve_connection ──RpcMessage──► Broker::process
//!                                                          │
//!                                                    Vec<Delivery>
//!                                                          │
//! socket ◄──lines── serve_connection ◄──mpsc─────── Outbox::deliver
//! ```

pub mod cli;
pub mod config;
pub mod connection;
pub mod listener;
pub mod outbox;
pub mod runtime;

pub use cli::Args;
pub use config::{apply_env_overrides, FileConfigSource};
pub use listener::ListenAddr;
pub use outbox::Outbox;
pub use runtime::BrokerRuntime;

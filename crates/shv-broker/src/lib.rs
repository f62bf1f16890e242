//! SHV broker core.
//!
//! Routes RPC requests, responses and signals between connected clients.
//! Clients authenticate with a hello/login handshake, may mount themselves
//! into a shared path tree and subscribe to signals under RI patterns.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Broker                               │
//! │                                                               │
//! │   process(conn, msg) ──► Handshake ──► ConnectionRegistry     │
//! │          │                                                    │
//! │          ├──► MountTree ──► local node ──► NodeHandler        │
//! │          │         │                                          │
//! │          │         └────► mounted client ──► CorrelationTable │
//! │          │                                                    │
//! │          └──► SubscriptionTable ──► signal fan-out            │
//! │                                                               │
//! │   ArcSwap<ConfigSnapshot>: users, roles, autosetups           │
//! └──────────────────────────┬───────────────────────────────────┘
//!                            │ Vec<Delivery>
//!                            ▼
//!                 transport (DeliverySink)
//! ```
//!
//! The core is synchronous and never performs I/O: every operation returns
//! the messages to send and the connections to close, and the transport
//! carries them out. Per-connection ordering therefore follows from the
//! transport processing each connection's input in order.

#![warn(clippy::all)]
#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod domain;
pub mod nodes;
pub mod ports;
pub mod service;
pub mod sweep;

pub use domain::{
    BrokerConfig, BrokerError, ConfigError, ConfigSnapshot, MountError, RiPattern,
    SubscribeOutcome, UnsubscribeOutcome,
};
pub use ports::{BrokerApi, ConfigSource, DeliverySink, SystemTimeSource, TimeSource};
pub use service::{Broker, Delivery};
pub use sweep::run_sweep;

/// Broker version reported by `.app:version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

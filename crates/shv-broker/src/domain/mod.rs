//! Domain types for the broker core.
//!
//! Pure state and algorithms: pattern matching, access resolution, the mount
//! tree, subscriptions, the login handshake, the connection registry and the
//! forward correlation table. Nothing here performs I/O.

pub mod access;
pub mod auth;
pub mod config;
pub mod correlation;
pub mod error;
pub mod mount;
pub mod registry;
pub mod ri;
pub mod subscription;

// Re-exports for convenience
pub use access::{access_level, is_local_path};
pub use auth::{Handshake, HandshakeState, HandshakeStep, LoginGrant};
pub use config::{BrokerConfig, ConfigError, ConfigSnapshot, TimeoutConfig};
pub use correlation::{CorrelationTable, ForwardKey, PendingForward};
pub use error::{BrokerError, MountError};
pub use mount::{LocalNode, MountTree, Resolution};
pub use registry::{Client, ConnectionRegistry, ConnectionState};
pub use ri::{RiError, RiPattern};
pub use subscription::{SubscribeOutcome, SubscriptionTable, Timestamp, UnsubscribeOutcome};

//! Inbound port: what a transport drives the broker with.

use shv_types::{ConnectionId, RpcMessage};
use std::time::Duration;

use crate::domain::ConfigSnapshot;
use crate::service::Delivery;

/// Broker operations used by transports.
///
/// Every call returns the deliveries it produced; the caller is responsible
/// for writing them to the addressed connections. Calls for one connection
/// must be made in the order its frames arrived.
pub trait BrokerApi: Send + Sync {
    /// Register a freshly accepted connection.
    fn connect(&self) -> ConnectionId;

    /// Handle one decoded message from `connection`.
    fn process(&self, connection: ConnectionId, message: RpcMessage) -> Vec<Delivery>;

    /// Release everything `connection` held.
    fn disconnect(&self, connection: ConnectionId) -> Vec<Delivery>;

    /// Expire subscriptions and forwarded requests.
    fn sweep(&self) -> Vec<Delivery>;

    /// Atomically replace the active configuration generation.
    fn reload(&self, snapshot: ConfigSnapshot);

    /// How long `connection` may stay silent before it is dropped.
    fn idle_timeout(&self, connection: ConnectionId) -> Duration;
}

//! Ports: the seams between the broker core and its collaborators.

pub mod inbound;
pub mod outbound;

pub use inbound::BrokerApi;
pub use outbound::{ConfigSource, DeliverySink, SystemTimeSource, TimeSource};

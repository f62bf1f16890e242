//! Outbound ports for the broker core.

use crate::domain::{BrokerConfig, ConfigError, Timestamp};
use crate::service::Delivery;

/// Time source for TTL and timeout handling.
///
/// Abstracted to allow testing with deterministic time.
pub trait TimeSource: Send + Sync {
    /// Returns the current timestamp in milliseconds.
    fn now(&self) -> Timestamp;
}

/// Default system time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp
    }
}

/// Supplies broker configuration generations.
pub trait ConfigSource: Send + Sync {
    /// Load the current configuration.
    fn load(&self) -> Result<BrokerConfig, ConfigError>;
}

/// Transport side that carries out deliveries produced by the broker.
pub trait DeliverySink: Send + Sync {
    fn deliver(&self, deliveries: Vec<Delivery>);
}

/// Mock time source for testing.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockTimeSource {
    time: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl MockTimeSource {
    pub fn new(initial: Timestamp) -> Self {
        Self {
            time: std::sync::atomic::AtomicU64::new(initial),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.time.fetch_add(ms, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set(&self, time: Timestamp) {
        self.time.store(time, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        self.time.load(std::sync::atomic::Ordering::SeqCst)
    }
}

//! Correlation table for requests forwarded to mounted clients.
//!
//! Maps `(target connection, outbound request id)` back to the caller and
//! the request id the caller used.

use dashmap::DashMap;
use shv_types::{ConnectionId, RequestId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::subscription::Timestamp;

/// Key of a forwarded request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForwardKey {
    pub target: ConnectionId,
    pub request_id: RequestId,
}

/// A request waiting for the target's response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingForward {
    /// Caller connection
    pub origin: ConnectionId,
    /// Request id the caller used
    pub origin_request_id: RequestId,
    /// When the request was forwarded
    pub created_at: Timestamp,
    /// Full path as the caller addressed it (for logging)
    pub path: String,
    /// Method name (for logging)
    pub method: String,
}

/// Statistics for the correlation table
#[derive(Debug, Default)]
pub struct CorrelationStats {
    /// Total requests forwarded
    pub total_forwarded: AtomicU64,
    /// Total responses routed back
    pub total_completed: AtomicU64,
    /// Total requests failed because the target disconnected
    pub total_failed: AtomicU64,
    /// Total requests timed out
    pub total_timeouts: AtomicU64,
    /// Total requests dropped because the caller disconnected
    pub total_abandoned: AtomicU64,
}

/// Outstanding forwarded requests.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: DashMap<ForwardKey, PendingForward>,
    stats: Arc<CorrelationStats>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a forwarded request.
    pub fn register(&self, key: ForwardKey, entry: PendingForward) {
        debug!(
            target_client = %key.target,
            request_id = key.request_id,
            origin_client = %entry.origin,
            method = %entry.method,
            "Registered forwarded request"
        );
        self.pending.insert(key, entry);
        self.stats.total_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Pop the entry for a response coming back from `key.target`.
    pub fn complete(&self, key: ForwardKey) -> Option<PendingForward> {
        match self.pending.remove(&key) {
            Some((_, entry)) => {
                self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            None => {
                debug!(
                    target_client = %key.target,
                    request_id = key.request_id,
                    "Response for unknown or expired request"
                );
                None
            }
        }
    }

    /// Pop one request whose target went away before it could be sent.
    pub fn cancel(&self, key: ForwardKey) -> Option<PendingForward> {
        let (_, entry) = self.pending.remove(&key)?;
        self.stats.total_failed.fetch_add(1, Ordering::Relaxed);
        Some(entry)
    }

    /// Pop every request forwarded to a disconnected target.
    pub fn fail_target(&self, target: ConnectionId) -> Vec<PendingForward> {
        let mut failed = Vec::new();
        self.pending.retain(|key, entry| {
            if key.target == target {
                failed.push(entry.clone());
                false
            } else {
                true
            }
        });
        if !failed.is_empty() {
            self.stats
                .total_failed
                .fetch_add(failed.len() as u64, Ordering::Relaxed);
            warn!(target_client = %target, count = failed.len(), "Failing requests to disconnected client");
        }
        failed
    }

    /// Drop every request a disconnected caller was waiting for.
    pub fn abandon_origin(&self, origin: ConnectionId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, entry| entry.origin != origin);
        let abandoned = before.saturating_sub(self.pending.len());
        self.stats
            .total_abandoned
            .fetch_add(abandoned as u64, Ordering::Relaxed);
        abandoned
    }

    /// Pop requests older than `timeout_ms`.
    pub fn remove_expired(&self, now: Timestamp, timeout_ms: u64) -> Vec<PendingForward> {
        let mut expired = Vec::new();
        self.pending.retain(|key, entry| {
            let elapsed = now.saturating_sub(entry.created_at);
            if elapsed > timeout_ms {
                warn!(
                    target_client = %key.target,
                    request_id = key.request_id,
                    method = %entry.method,
                    elapsed_ms = elapsed,
                    "Removing expired forwarded request"
                );
                expired.push(entry.clone());
                false
            } else {
                true
            }
        });
        self.stats
            .total_timeouts
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired
    }

    /// Get number of outstanding requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Get statistics
    pub fn stats(&self) -> &CorrelationStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALLER: ConnectionId = ConnectionId(1);
    const DEVICE: ConnectionId = ConnectionId(2);

    fn entry(origin: ConnectionId, rid: RequestId, at: Timestamp) -> PendingForward {
        PendingForward {
            origin,
            origin_request_id: rid,
            created_at: at,
            path: "test/device/value".into(),
            method: "get".into(),
        }
    }

    fn key(target: ConnectionId, request_id: RequestId) -> ForwardKey {
        ForwardKey { target, request_id }
    }

    #[test]
    fn test_register_and_complete() {
        let table = CorrelationTable::new();
        table.register(key(DEVICE, 1), entry(CALLER, 42, 0));
        assert_eq!(table.pending_count(), 1);
        let popped = table.complete(key(DEVICE, 1)).unwrap();
        assert_eq!(popped.origin_request_id, 42);
        assert!(table.complete(key(DEVICE, 1)).is_none());
        assert_eq!(table.stats().total_completed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_cancel_pops_once() {
        let table = CorrelationTable::new();
        table.register(key(DEVICE, 4), entry(CALLER, 40, 0));
        assert_eq!(table.cancel(key(DEVICE, 4)).unwrap().origin_request_id, 40);
        assert!(table.cancel(key(DEVICE, 4)).is_none());
        assert!(table.fail_target(DEVICE).is_empty());
        assert_eq!(table.stats().total_failed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_same_id_on_different_targets() {
        let table = CorrelationTable::new();
        table.register(key(DEVICE, 1), entry(CALLER, 10, 0));
        table.register(key(ConnectionId(3), 1), entry(CALLER, 11, 0));
        assert_eq!(table.complete(key(ConnectionId(3), 1)).unwrap().origin_request_id, 11);
        assert_eq!(table.complete(key(DEVICE, 1)).unwrap().origin_request_id, 10);
    }

    #[test]
    fn test_fail_target() {
        let table = CorrelationTable::new();
        table.register(key(DEVICE, 1), entry(CALLER, 10, 0));
        table.register(key(DEVICE, 2), entry(CALLER, 11, 0));
        table.register(key(ConnectionId(3), 1), entry(CALLER, 12, 0));
        let failed = table.fail_target(DEVICE);
        assert_eq!(failed.len(), 2);
        assert_eq!(table.pending_count(), 1);
    }

    #[test]
    fn test_abandon_origin() {
        let table = CorrelationTable::new();
        table.register(key(DEVICE, 1), entry(CALLER, 10, 0));
        table.register(key(DEVICE, 2), entry(ConnectionId(5), 10, 0));
        assert_eq!(table.abandon_origin(CALLER), 1);
        assert_eq!(table.pending_count(), 1);
    }

    #[test]
    fn test_remove_expired() {
        let table = CorrelationTable::new();
        table.register(key(DEVICE, 1), entry(CALLER, 10, 0));
        table.register(key(DEVICE, 2), entry(CALLER, 11, 5_000));
        let expired = table.remove_expired(8_000, 5_000);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].origin_request_id, 10);
        assert_eq!(table.pending_count(), 1);
    }
}

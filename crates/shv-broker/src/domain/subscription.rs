//! # Subscription Table
//!
//! Per-connection signal subscriptions keyed by RI pattern text, with
//! optional TTL. Re-subscribing an existing pattern refreshes it: a new
//! TTL replaces the old one, no TTL keeps the current expiry.
//!
//! Fan-out evaluates all subscriptions under one read lock, so a single
//! signal is matched against one consistent subscription set.

use parking_lot::RwLock;
use shv_types::ConnectionId;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

use super::ri::RiPattern;

/// Milliseconds since the UNIX epoch.
pub type Timestamp = u64;

/// Outcome of [`SubscriptionTable::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Added,
    Refreshed,
}

/// Outcome of [`SubscriptionTable::unsubscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    Removed,
    NotFound,
}

#[derive(Debug, Clone)]
struct Subscription {
    pattern: RiPattern,
    expires_at: Option<Timestamp>,
}

impl Subscription {
    fn is_live(&self, now: Timestamp) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Subscriptions of all connections.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    by_connection: RwLock<HashMap<ConnectionId, BTreeMap<String, Subscription>>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or refresh a subscription. An entry whose TTL already lapsed but
    /// was not yet swept counts as absent.
    pub fn subscribe(
        &self,
        connection: ConnectionId,
        pattern: RiPattern,
        ttl: Option<Duration>,
        now: Timestamp,
    ) -> SubscribeOutcome {
        let key = pattern.as_str().to_string();
        let mut table = self.by_connection.write();
        let subs = table.entry(connection).or_default();
        let live_expiry = subs
            .get(&key)
            .filter(|old| old.is_live(now))
            .map(|old| old.expires_at);
        let expires_at = match ttl {
            Some(ttl) => Some(now.saturating_add(ttl.as_millis() as u64)),
            None => live_expiry.flatten(),
        };
        subs.insert(key.clone(), Subscription { pattern, expires_at });
        let outcome = match live_expiry {
            Some(_) => SubscribeOutcome::Refreshed,
            None => SubscribeOutcome::Added,
        };
        debug!(client_id = %connection, ri = %key, ?ttl, ?outcome, "Subscribe");
        outcome
    }

    /// Remove a subscription by its pattern text.
    pub fn unsubscribe(&self, connection: ConnectionId, pattern: &str) -> UnsubscribeOutcome {
        let mut table = self.by_connection.write();
        let Some(subs) = table.get_mut(&connection) else {
            return UnsubscribeOutcome::NotFound;
        };
        let removed = subs.remove(pattern.trim()).is_some();
        if subs.is_empty() {
            table.remove(&connection);
        }
        if removed {
            debug!(client_id = %connection, ri = %pattern, "Unsubscribe");
            UnsubscribeOutcome::Removed
        } else {
            UnsubscribeOutcome::NotFound
        }
    }

    /// Drop every subscription whose TTL lapsed. Returns what was removed.
    pub fn expired_sweep(&self, now: Timestamp) -> Vec<(ConnectionId, String)> {
        let mut removed = Vec::new();
        let mut table = self.by_connection.write();
        table.retain(|connection, subs| {
            subs.retain(|key, sub| {
                let live = sub.is_live(now);
                if !live {
                    removed.push((*connection, key.clone()));
                }
                live
            });
            !subs.is_empty()
        });
        if !removed.is_empty() {
            debug!(count = removed.len(), "Expired subscriptions removed");
        }
        removed
    }

    /// Live subscriptions of a connection with their remaining TTL.
    pub fn list(&self, connection: ConnectionId, now: Timestamp) -> BTreeMap<String, Option<Duration>> {
        self.by_connection
            .read()
            .get(&connection)
            .map(|subs| {
                subs.iter()
                    .filter(|(_, sub)| sub.is_live(now))
                    .map(|(key, sub)| {
                        let remaining = sub
                            .expires_at
                            .map(|at| Duration::from_millis(at.saturating_sub(now)));
                        (key.clone(), remaining)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of live subscriptions of a connection.
    pub fn count(&self, connection: ConnectionId, now: Timestamp) -> usize {
        self.by_connection
            .read()
            .get(&connection)
            .map_or(0, |subs| subs.values().filter(|s| s.is_live(now)).count())
    }

    /// Forget a connection entirely.
    pub fn remove_connection(&self, connection: ConnectionId) -> usize {
        self.by_connection
            .write()
            .remove(&connection)
            .map_or(0, |subs| subs.len())
    }

    /// Recipients of a signal: each connection other than `origin` with a
    /// live matching subscription that `permitted` accepts, once, together
    /// with the first pattern that matched.
    pub fn route_signal(
        &self,
        path: &str,
        source: &str,
        signal: &str,
        origin: Option<ConnectionId>,
        now: Timestamp,
        mut permitted: impl FnMut(ConnectionId) -> bool,
    ) -> Vec<(ConnectionId, String)> {
        let table = self.by_connection.read();
        let mut recipients: Vec<(ConnectionId, String)> = table
            .iter()
            .filter(|(connection, _)| Some(**connection) != origin)
            .filter_map(|(connection, subs)| {
                subs.iter()
                    .find(|(_, sub)| sub.is_live(now) && sub.pattern.matches(path, source, Some(signal)))
                    .map(|(key, _)| (*connection, key.clone()))
            })
            .collect();
        drop(table);
        recipients.retain(|(connection, _)| permitted(*connection));
        recipients.sort_by_key(|(connection, _)| *connection);
        recipients
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ConnectionId = ConnectionId(1);
    const B: ConnectionId = ConnectionId(2);
    const T0: Timestamp = 1_000_000;

    fn ri(s: &str) -> RiPattern {
        RiPattern::parse(s).unwrap()
    }

    #[test]
    fn test_subscribe_twice_refreshes() {
        let table = SubscriptionTable::new();
        assert_eq!(table.subscribe(A, ri("test/**:*:*"), None, T0), SubscribeOutcome::Added);
        assert_eq!(table.subscribe(A, ri("test/**:*:*"), None, T0), SubscribeOutcome::Refreshed);
        assert_eq!(table.count(A, T0), 1);
    }

    #[test]
    fn test_unsubscribe_twice_reports_not_found() {
        let table = SubscriptionTable::new();
        table.subscribe(A, ri("test/device/*:*:*"), None, T0);
        assert_eq!(table.unsubscribe(A, "test/device/*:*:*"), UnsubscribeOutcome::Removed);
        assert_eq!(table.unsubscribe(A, "test/device/*:*:*"), UnsubscribeOutcome::NotFound);
    }

    #[test]
    fn test_ttl_refresh_replaces() {
        let table = SubscriptionTable::new();
        table.subscribe(A, ri("**:*:*"), Some(Duration::from_secs(30)), T0);
        let later = T0 + 130_000;
        table.subscribe(A, ri("**:*:*"), Some(Duration::from_secs(130)), later);
        let remaining = table.list(A, later)["**:*:*"].unwrap();
        assert!(remaining > Duration::from_secs(100));
        assert!(remaining <= Duration::from_secs(130));
    }

    #[test]
    fn test_resubscribe_without_ttl_keeps_expiry() {
        let table = SubscriptionTable::new();
        table.subscribe(A, ri("**:*:*"), Some(Duration::from_secs(30)), T0);
        let later = T0 + 10_000;
        let outcome = table.subscribe(A, ri("**:*:*"), None, later);
        assert_eq!(outcome, SubscribeOutcome::Refreshed);
        let remaining = table.list(A, later)["**:*:*"].unwrap();
        assert_eq!(remaining, Duration::from_secs(20));
        assert_eq!(table.expired_sweep(T0 + 30_000).len(), 1);
    }

    #[test]
    fn test_lapsed_entry_resubscribed_without_ttl_is_permanent() {
        let table = SubscriptionTable::new();
        table.subscribe(A, ri("**:*:*"), Some(Duration::from_secs(30)), T0);
        let later = T0 + 31_000;
        assert_eq!(table.subscribe(A, ri("**:*:*"), None, later), SubscribeOutcome::Added);
        assert_eq!(table.list(A, later)["**:*:*"], None);
    }

    #[test]
    fn test_expired_sweep() {
        let table = SubscriptionTable::new();
        table.subscribe(A, ri("a/**:*:*"), Some(Duration::from_secs(10)), T0);
        table.subscribe(A, ri("b/**:*:*"), None, T0);
        assert!(table.expired_sweep(T0 + 5_000).is_empty());
        let removed = table.expired_sweep(T0 + 10_000);
        assert_eq!(removed, vec![(A, "a/**:*:*".to_string())]);
        assert_eq!(table.list(A, T0 + 10_000).len(), 1);
    }

    #[test]
    fn test_expired_entry_is_invisible_before_sweep() {
        let table = SubscriptionTable::new();
        table.subscribe(A, ri("a/**:*:*"), Some(Duration::from_secs(1)), T0);
        assert!(table.list(A, T0 + 2_000).is_empty());
        assert!(table
            .route_signal("a/x", "get", "chng", None, T0 + 2_000, |_| true)
            .is_empty());
        assert_eq!(
            table.subscribe(A, ri("a/**:*:*"), None, T0 + 2_000),
            SubscribeOutcome::Added
        );
    }

    #[test]
    fn test_route_signal_once_per_connection() {
        let table = SubscriptionTable::new();
        table.subscribe(A, ri("test/**:*:*"), None, T0);
        table.subscribe(A, ri("test/device/*:get:chng"), None, T0);
        table.subscribe(B, ri("other/**:*:*"), None, T0);
        let recipients = table.route_signal("test/device/value", "get", "chng", None, T0, |_| true);
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].0, A);
    }

    #[test]
    fn test_route_signal_skips_origin_and_denied() {
        let table = SubscriptionTable::new();
        table.subscribe(A, ri("**:*:*"), None, T0);
        table.subscribe(B, ri("**:*:*"), None, T0);
        let recipients = table.route_signal("x", "get", "chng", Some(A), T0, |_| true);
        assert_eq!(recipients, vec![(B, "**:*:*".to_string())]);
        let recipients = table.route_signal("x", "get", "chng", None, T0, |c| c == A);
        assert_eq!(recipients, vec![(A, "**:*:*".to_string())]);
    }

    #[test]
    fn test_remove_connection() {
        let table = SubscriptionTable::new();
        table.subscribe(A, ri("**:*:*"), None, T0);
        table.subscribe(A, ri("x/**:*:*"), None, T0);
        assert_eq!(table.remove_connection(A), 2);
        assert!(table.list(A, T0).is_empty());
        assert_eq!(table.remove_connection(A), 0);
    }
}

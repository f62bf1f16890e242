//! # Connection Registry
//!
//! Owns the per-connection state: lifecycle, handshake, bound identity and
//! the counter for request ids the broker uses when forwarding to it.
//!
//! Client ids start at 1 and are handed out in increasing order; an id is
//! never given to a second connection while the broker runs.

use parking_lot::RwLock;
use shv_types::{ConnectionId, RequestId};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::debug;

use super::auth::{Handshake, LoginGrant};
use super::subscription::Timestamp;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Active,
    Closing,
}

/// Everything the broker tracks about one connection.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ConnectionId,
    pub state: ConnectionState,
    pub handshake: Handshake,
    pub user: Option<String>,
    pub roles: Vec<String>,
    pub device_id: Option<String>,
    pub mount_point: Option<String>,
    pub idle_timeout: Option<Duration>,
    pub connected_at: Timestamp,
    pub last_activity: Timestamp,
    next_request_id: RequestId,
}

impl Client {
    fn new(id: ConnectionId, now: Timestamp) -> Self {
        Self {
            id,
            state: ConnectionState::Connecting,
            handshake: Handshake::new(),
            user: None,
            roles: Vec::new(),
            device_id: None,
            mount_point: None,
            idle_timeout: None,
            connected_at: now,
            last_activity: now,
            next_request_id: 1,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ConnectionState::Active
    }

    /// Bind the identity from a successful login.
    pub fn bind(&mut self, grant: &LoginGrant) {
        self.user = Some(grant.user.clone());
        self.roles = grant.roles.clone();
        self.device_id = grant.device_id.clone();
        self.idle_timeout = grant.idle_timeout;
    }
}

/// All live connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    clients: RwLock<BTreeMap<ConnectionId, Client>>,
    next_id: AtomicU32,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(BTreeMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Register a freshly accepted connection.
    pub fn register(&self, now: Timestamp) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.clients.write().insert(id, Client::new(id, now));
        debug!(client_id = %id, "Connection registered");
        id
    }

    /// Remove a connection, returning its final state.
    pub fn remove(&self, id: ConnectionId) -> Option<Client> {
        let removed = self.clients.write().remove(&id);
        if removed.is_some() {
            debug!(client_id = %id, "Connection removed");
        }
        removed
    }

    /// Run `f` on a client under the write lock.
    pub fn with_client_mut<R>(&self, id: ConnectionId, f: impl FnOnce(&mut Client) -> R) -> Option<R> {
        self.clients.write().get_mut(&id).map(f)
    }

    /// Copy of a client's state.
    pub fn get(&self, id: ConnectionId) -> Option<Client> {
        self.clients.read().get(&id).cloned()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.clients.read().contains_key(&id)
    }

    pub fn is_active(&self, id: ConnectionId) -> bool {
        self.clients.read().get(&id).is_some_and(Client::is_active)
    }

    /// Roles of every active client, for one fan-out pass.
    pub fn active_roles(&self) -> BTreeMap<ConnectionId, Vec<String>> {
        self.clients
            .read()
            .values()
            .filter(|c| c.is_active())
            .map(|c| (c.id, c.roles.clone()))
            .collect()
    }

    /// Ids of all active clients.
    pub fn active_ids(&self) -> Vec<ConnectionId> {
        self.clients
            .read()
            .values()
            .filter(|c| c.is_active())
            .map(|c| c.id)
            .collect()
    }

    /// Record traffic from a client.
    pub fn touch(&self, id: ConnectionId, now: Timestamp) {
        if let Some(client) = self.clients.write().get_mut(&id) {
            client.last_activity = now;
        }
    }

    /// Allocate a request id for a request forwarded to `id`.
    pub fn next_request_id(&self, id: ConnectionId) -> Option<RequestId> {
        self.with_client_mut(id, |client| {
            let rid = client.next_request_id;
            client.next_request_id = client.next_request_id.wrapping_add(1).max(1);
            rid
        })
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}

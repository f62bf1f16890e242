//! Broker service: the explicit context tying all broker state together.
//!
//! A transport owns an `Arc<Broker>`, feeds it decoded messages per
//! connection and carries out the returned [`Delivery`] list. The broker
//! itself never performs I/O and never holds a lock across a call into a
//! transport.

use arc_swap::ArcSwap;
use serde_json::{json, Value};
use shv_types::{AccessLevel, ConnectionId, RequestId, RpcMessage, RpcRequest, RpcResponse, RpcSignal};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::ri::normalize_path;
use crate::domain::{
    BrokerError, Client, ConfigSnapshot, ConnectionRegistry, ConnectionState, CorrelationTable,
    ForwardKey, HandshakeStep, LoginGrant, MountError, MountTree, PendingForward, Resolution,
    SubscriptionTable, Timestamp,
};
use crate::nodes::{self, CallContext};
use crate::ports::{BrokerApi, SystemTimeSource, TimeSource};

/// Something the transport has to do on the broker's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Send `message` to connection `to`
    Message { to: ConnectionId, message: RpcMessage },
    /// Close connection; the transport then calls [`Broker::disconnect`]
    Disconnect(ConnectionId),
}

impl Delivery {
    fn response(to: ConnectionId, request_id: RequestId, result: Result<Value, BrokerError>) -> Self {
        Delivery::Message {
            to,
            message: RpcMessage::Response(RpcResponse::from_result(
                request_id,
                result.map_err(Into::into),
            )),
        }
    }
}

/// Append `user:broker` to a user id chain.
pub fn extend_user_id(previous: Option<&str>, user: Option<&str>, broker: &str) -> String {
    let entry = format!("{}:{}", user.unwrap_or_default(), broker);
    match previous.filter(|p| !p.is_empty()) {
        Some(prev) => format!("{};{}", prev, entry),
        None => entry,
    }
}

/// The broker context.
pub struct Broker {
    config: ArcSwap<ConfigSnapshot>,
    registry: ConnectionRegistry,
    mounts: MountTree,
    subscriptions: SubscriptionTable,
    correlations: CorrelationTable,
    time: Arc<dyn TimeSource>,
}

impl Broker {
    /// Create a broker using the system clock.
    pub fn new(config: ConfigSnapshot) -> Self {
        Self::with_time_source(config, Arc::new(SystemTimeSource))
    }

    /// Create a broker with an explicit time source.
    pub fn with_time_source(config: ConfigSnapshot, time: Arc<dyn TimeSource>) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            registry: ConnectionRegistry::new(),
            mounts: MountTree::new(),
            subscriptions: SubscriptionTable::new(),
            correlations: CorrelationTable::new(),
            time,
        }
    }

    /// Current configuration generation.
    pub fn config(&self) -> Arc<ConfigSnapshot> {
        self.config.load_full()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn mounts(&self) -> &MountTree {
        &self.mounts
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    pub fn correlations(&self) -> &CorrelationTable {
        &self.correlations
    }

    pub fn now(&self) -> Timestamp {
        self.time.now()
    }

    /// Resolve a path; aliases of clients that are not active resolve to
    /// `NotFound`.
    pub fn resolve(&self, path: &str) -> Resolution {
        match self.mounts.resolve(path) {
            Resolution::ClientAlias { connection, .. } if !self.registry.is_active(connection) => {
                Resolution::NotFound
            }
            other => other,
        }
    }

    /// Register a freshly accepted connection.
    pub fn connect(&self) -> ConnectionId {
        let id = self.registry.register(self.now());
        info!(client_id = %id, "Client connected");
        id
    }

    /// Handle one decoded message from `connection`.
    pub fn process(&self, connection: ConnectionId, message: RpcMessage) -> Vec<Delivery> {
        let now = self.now();
        let Some(client) = self.registry.get(connection) else {
            debug!(client_id = %connection, "Message from unknown connection dropped");
            return Vec::new();
        };
        self.registry.touch(connection, now);

        match message {
            RpcMessage::Request(request) if client.is_active() => {
                self.dispatch(&client, request, now)
            }
            RpcMessage::Request(request) => self.handshake(connection, request, now),
            RpcMessage::Response(response) if client.is_active() => {
                self.route_response(connection, response)
            }
            RpcMessage::Signal(signal) if client.is_active() => {
                self.route_client_signal(&client, signal, now)
            }
            other => {
                let err = BrokerError::Protocol("Only requests are allowed before login".into());
                warn!(client_id = %connection, kind = ?other, error = %err, "Dropping connection");
                vec![Delivery::Disconnect(connection)]
            }
        }
    }

    fn handshake(&self, connection: ConnectionId, request: RpcRequest, now: Timestamp) -> Vec<Delivery> {
        let config = self.config.load_full();
        let step = self.registry.with_client_mut(connection, |client| {
            if client.state == ConnectionState::Connecting {
                client.state = ConnectionState::Authenticating;
            }
            client
                .handshake
                .advance(&request.method, request.param.as_ref(), &config)
        });
        let rid = request.request_id;

        let result = match step {
            None => return Vec::new(),
            Some(Ok(HandshakeStep::Nonce(nonce))) => {
                return vec![Delivery::response(connection, rid, Ok(json!({ "nonce": nonce })))];
            }
            Some(Ok(HandshakeStep::LoggedIn(grant))) => self.complete_login(connection, &grant, &config, now),
            Some(Err(err)) => Err(err),
        };

        match result {
            Ok(mut deliveries) => {
                deliveries.insert(
                    0,
                    Delivery::response(connection, rid, Ok(json!({ "clientId": connection.0 }))),
                );
                deliveries
            }
            Err(err) => {
                self.registry
                    .with_client_mut(connection, |client| client.handshake.reject());
                warn!(client_id = %connection, error = %err, "Login failed");
                vec![
                    Delivery::response(connection, rid, Err(err)),
                    Delivery::Disconnect(connection),
                ]
            }
        }
    }

    fn complete_login(
        &self,
        connection: ConnectionId,
        grant: &LoginGrant,
        config: &ConfigSnapshot,
        now: Timestamp,
    ) -> Result<Vec<Delivery>, BrokerError> {
        let autosetup = grant
            .device_id
            .as_deref()
            .and_then(|device| config.autosetup_for(device, &grant.roles).map(|a| (device, a)));

        let requested = match (&grant.mount_point, autosetup) {
            (Some(path), _) => Some(normalize_path(path)),
            (None, Some((device, setup))) => {
                let role = grant.roles.first().map(String::as_str).unwrap_or_default();
                Some(normalize_path(&setup.expand_mount_point(device, role, connection.0)))
            }
            (None, None) => None,
        };

        let mount_point = match requested {
            Some(path) => {
                if !config.mount_allowed(&grant.roles, &path) {
                    return Err(MountError::NotAllowed.into());
                }
                Some(self.mounts.mount(&path, connection)?)
            }
            None => None,
        };

        let bound = self.registry.with_client_mut(connection, |client| {
            client.bind(grant);
            client.mount_point = mount_point.clone();
            client.handshake.complete();
            client.state = ConnectionState::Active;
        });
        if bound.is_none() {
            self.mounts.unmount(connection);
            return Err(BrokerError::Protocol("Connection closed during login".into()));
        }

        if let Some((_, setup)) = autosetup {
            for pattern in &setup.subscriptions {
                self.subscriptions.subscribe(connection, pattern.clone(), None, now);
            }
        }

        info!(
            client_id = %connection,
            user = %grant.user,
            mount_point = mount_point.as_deref().unwrap_or(""),
            "Client logged in"
        );

        Ok(match mount_point {
            Some(path) => self.lsmod(&path, true, connection, now),
            None => Vec::new(),
        })
    }

    fn dispatch(&self, client: &Client, request: RpcRequest, now: Timestamp) -> Vec<Delivery> {
        let rid = request.request_id;
        let path = normalize_path(&request.path);
        match self.dispatch_inner(client, &path, request, now) {
            Ok(deliveries) => deliveries,
            Err(err) => {
                debug!(client_id = %client.id, path = %path, error = %err, "Request failed");
                vec![Delivery::response(client.id, rid, Err(err))]
            }
        }
    }

    fn dispatch_inner(
        &self,
        client: &Client,
        path: &str,
        request: RpcRequest,
        now: Timestamp,
    ) -> Result<Vec<Delivery>, BrokerError> {
        let config = self.config.load_full();
        let level = config.access_level(&client.roles, path, &request.method);

        let (target, relative_path, required) = match self.resolve(path) {
            Resolution::Local(node) => {
                let handler = nodes::handler_for(&node);
                let descriptor = nodes::describe(handler, &request.method)
                    .ok_or_else(|| BrokerError::not_found(path, &request.method))?;
                if level.map_or(true, |l| l < descriptor.access) {
                    return Err(BrokerError::access_denied(path, &request.method));
                }
                let mut ctx = CallContext {
                    broker: self,
                    caller: client.id,
                    path,
                    node: &node,
                    now,
                    deliveries: Vec::new(),
                };
                let result = nodes::call(handler, &request.method, request.param.as_ref(), &mut ctx)?;
                let mut deliveries = vec![Delivery::response(client.id, request.request_id, Ok(result))];
                deliveries.append(&mut ctx.deliveries);
                return Ok(deliveries);
            }
            Resolution::Mounted {
                connection,
                relative_path,
            } => (connection, relative_path, AccessLevel::Browse),
            Resolution::ClientAlias {
                connection,
                relative_path,
            } => (connection, relative_path, AccessLevel::SuperService),
            Resolution::NotFound => return Err(BrokerError::not_found(path, &request.method)),
        };

        let Some(level) = level.filter(|l| *l >= required) else {
            return Err(BrokerError::access_denied(path, &request.method));
        };
        let outbound_id = self
            .registry
            .next_request_id(target)
            .ok_or_else(|| BrokerError::not_found(path, &request.method))?;

        let tracked = self.track_forward(
            ForwardKey {
                target,
                request_id: outbound_id,
            },
            PendingForward {
                origin: client.id,
                origin_request_id: request.request_id,
                created_at: now,
                path: path.to_string(),
                method: request.method.clone(),
            },
        )?;
        if !tracked {
            return Ok(Vec::new());
        }

        let forwarded = RpcRequest {
            request_id: outbound_id,
            path: relative_path,
            method: request.method,
            param: request.param,
            user_id: Some(extend_user_id(
                request.user_id.as_deref(),
                client.user.as_deref(),
                &config.name,
            )),
            access: Some(level),
        };
        Ok(vec![Delivery::Message {
            to: target,
            message: RpcMessage::Request(forwarded),
        }])
    }

    /// Register a forwarded request. The target may disconnect between id
    /// allocation and registration, in which case its cleanup never saw the
    /// entry. Returns `false` when that cleanup already answered the caller.
    fn track_forward(&self, key: ForwardKey, entry: PendingForward) -> Result<bool, BrokerError> {
        self.correlations.register(key, entry);
        if self.registry.contains(key.target) {
            return Ok(true);
        }
        match self.correlations.cancel(key) {
            Some(_) => Err(BrokerError::ForwardFailure(key.target.0)),
            None => Ok(false),
        }
    }

    fn route_response(&self, connection: ConnectionId, response: RpcResponse) -> Vec<Delivery> {
        let key = ForwardKey {
            target: connection,
            request_id: response.request_id,
        };
        let Some(entry) = self.correlations.complete(key) else {
            return Vec::new();
        };
        if !self.registry.contains(entry.origin) {
            return Vec::new();
        }
        vec![Delivery::Message {
            to: entry.origin,
            message: RpcMessage::Response(RpcResponse {
                request_id: entry.origin_request_id,
                ..response
            }),
        }]
    }

    fn route_client_signal(&self, client: &Client, signal: RpcSignal, now: Timestamp) -> Vec<Delivery> {
        let Some(mount_point) = &client.mount_point else {
            debug!(client_id = %client.id, "Signal from unmounted client dropped");
            return Vec::new();
        };
        let relative = normalize_path(&signal.path);
        let path = if relative.is_empty() {
            mount_point.clone()
        } else {
            format!("{}/{}", mount_point, relative)
        };
        self.fan_out(RpcSignal { path, ..signal }, Some(client.id), now)
    }

    /// Deliver a signal to every permitted subscriber except `origin`.
    pub fn fan_out(&self, signal: RpcSignal, origin: Option<ConnectionId>, now: Timestamp) -> Vec<Delivery> {
        let config = self.config.load_full();
        let roles = self.registry.active_roles();
        let required = signal.required_access().max(AccessLevel::Browse);
        let recipients = self.subscriptions.route_signal(
            &signal.path,
            &signal.source,
            &signal.signal,
            origin,
            now,
            |connection| {
                roles
                    .get(&connection)
                    .and_then(|r| config.signal_access_level(r, &signal.path, &signal.source, &signal.signal))
                    .is_some_and(|level| level >= required)
            },
        );
        recipients
            .into_iter()
            .map(|(to, _)| Delivery::Message {
                to,
                message: RpcMessage::Signal(signal.clone()),
            })
            .collect()
    }

    /// `ls:lsmod` signal on the parent of a mount point that came or went.
    fn lsmod(&self, mount_point: &str, added: bool, origin: ConnectionId, now: Timestamp) -> Vec<Delivery> {
        let (parent, name) = mount_point.rsplit_once('/').unwrap_or(("", mount_point));
        let mut change = serde_json::Map::new();
        change.insert(name.to_string(), Value::Bool(added));
        let signal = RpcSignal::new(parent, "ls", "lsmod", Some(Value::Object(change)));
        self.fan_out(
            RpcSignal {
                access: Some(AccessLevel::Browse),
                ..signal
            },
            Some(origin),
            now,
        )
    }

    /// Release everything `connection` held.
    pub fn disconnect(&self, connection: ConnectionId) -> Vec<Delivery> {
        let now = self.now();
        self.registry
            .with_client_mut(connection, |client| client.state = ConnectionState::Closing);
        let Some(client) = self.registry.remove(connection) else {
            return Vec::new();
        };

        let unmounted = self.mounts.unmount(connection);
        let subscriptions = self.subscriptions.remove_connection(connection);
        let abandoned = self.correlations.abandon_origin(connection);

        let mut deliveries: Vec<Delivery> = self
            .correlations
            .fail_target(connection)
            .into_iter()
            .filter(|entry| self.registry.contains(entry.origin))
            .map(|entry| {
                Delivery::response(
                    entry.origin,
                    entry.origin_request_id,
                    Err(BrokerError::ForwardFailure(connection.0)),
                )
            })
            .collect();
        for path in &unmounted {
            deliveries.extend(self.lsmod(path, false, connection, now));
        }

        info!(
            client_id = %connection,
            user = client.user.as_deref().unwrap_or(""),
            unmounted = unmounted.len(),
            subscriptions,
            abandoned,
            "Client disconnected"
        );
        deliveries
    }

    /// Expire subscriptions and forwarded requests past their deadline.
    pub fn sweep(&self) -> Vec<Delivery> {
        let now = self.now();
        self.subscriptions.expired_sweep(now);
        let timeout = self.config.load().timeouts.forward.as_millis() as u64;
        let expired = self.correlations.remove_expired(now, timeout);
        if !expired.is_empty() {
            let stats = self.correlations.stats();
            debug!(
                timed_out = expired.len(),
                pending = self.correlations.pending_count(),
                total_forwarded = stats.total_forwarded.load(Ordering::Relaxed),
                total_timeouts = stats.total_timeouts.load(Ordering::Relaxed),
                "Forwarded requests timed out"
            );
        }
        expired
            .into_iter()
            .filter(|entry| self.registry.contains(entry.origin))
            .map(|entry| {
                Delivery::response(entry.origin, entry.origin_request_id, Err(BrokerError::ForwardTimeout))
            })
            .collect()
    }

    /// Atomically replace the configuration generation.
    pub fn reload(&self, snapshot: ConfigSnapshot) {
        info!(name = %snapshot.name, "Configuration reloaded");
        self.config.store(Arc::new(snapshot));
    }

    /// Silence allowed on `connection` before it is dropped.
    pub fn idle_timeout(&self, connection: ConnectionId) -> Duration {
        let config = self.config.load();
        match self.registry.get(connection) {
            Some(client) if client.is_active() => client.idle_timeout.unwrap_or(config.timeouts.idle),
            _ => config.timeouts.login,
        }
    }
}

impl BrokerApi for Broker {
    fn connect(&self) -> ConnectionId {
        Broker::connect(self)
    }

    fn process(&self, connection: ConnectionId, message: RpcMessage) -> Vec<Delivery> {
        Broker::process(self, connection, message)
    }

    fn disconnect(&self, connection: ConnectionId) -> Vec<Delivery> {
        Broker::disconnect(self, connection)
    }

    fn sweep(&self) -> Vec<Delivery> {
        Broker::sweep(self)
    }

    fn reload(&self, snapshot: ConfigSnapshot) {
        Broker::reload(self, snapshot)
    }

    fn idle_timeout(&self, connection: ConnectionId) -> Duration {
        Broker::idle_timeout(self, connection)
    }
}

//! `.broker` and `.broker/client`: broker administration.

use serde_json::{json, Map, Value};
use shv_types::{AccessLevel, ConnectionId};

use super::{flags, param_client_id, param_str, CallContext, MethodDescriptor, NodeHandler};
use crate::domain::{BrokerError, Timestamp};
use crate::service::{Broker, Delivery};

const METHODS: &[MethodDescriptor] = &[
    MethodDescriptor::new("name", flags::GETTER, AccessLevel::Browse, "Null", "String"),
    MethodDescriptor::new("clientInfo", 0, AccessLevel::SuperService, "Int", "{...} | Null"),
    MethodDescriptor::new("mountedClientInfo", 0, AccessLevel::SuperService, "String", "{...} | Null"),
    MethodDescriptor::new("clients", flags::GETTER, AccessLevel::SuperService, "Null", "[Int]"),
    MethodDescriptor::new("mounts", flags::GETTER, AccessLevel::SuperService, "Null", "[String]"),
    MethodDescriptor::new("disconnectClient", 0, AccessLevel::SuperService, "Int", "Null"),
];

/// Info map of an active client, `None` when there is no such client.
pub fn client_info(broker: &Broker, id: ConnectionId, now: Timestamp) -> Option<Value> {
    let client = broker.registry().get(id).filter(|c| c.is_active())?;
    let subscriptions: Map<String, Value> = broker
        .subscriptions()
        .list(id, now)
        .into_iter()
        .map(|(ri, ttl)| (ri, ttl.map_or(Value::Null, |d| json!(d.as_secs()))))
        .collect();
    Some(json!({
        "clientId": client.id.0,
        "userName": client.user,
        "role": client.roles.join(","),
        "deviceId": client.device_id,
        "mountPoint": client.mount_point,
        "subscriptions": subscriptions,
        "idleTime": now.saturating_sub(client.last_activity),
    }))
}

pub struct BrokerNode;

impl NodeHandler for BrokerNode {
    fn methods(&self) -> &'static [MethodDescriptor] {
        METHODS
    }

    fn children(&self, _ctx: &CallContext<'_>) -> Vec<String> {
        vec!["client".to_string(), "currentClient".to_string()]
    }

    fn invoke(
        &self,
        method: &str,
        param: Option<&Value>,
        ctx: &mut CallContext<'_>,
    ) -> Result<Value, BrokerError> {
        let broker = ctx.broker;
        match method {
            "name" => Ok(json!(broker.config().name)),
            "clientInfo" => {
                let id = param_client_id(param)?;
                Ok(client_info(broker, id, ctx.now).unwrap_or(Value::Null))
            }
            "mountedClientInfo" => {
                let path = param_str(param, "mount point")?;
                Ok(broker
                    .mounts()
                    .owner(path)
                    .and_then(|id| client_info(broker, id, ctx.now))
                    .unwrap_or(Value::Null))
            }
            "clients" => {
                let ids: Vec<u32> = broker.registry().active_ids().iter().map(|id| id.0).collect();
                Ok(json!(ids))
            }
            "mounts" => {
                let paths: Vec<String> = broker.mounts().snapshot().into_iter().map(|(p, _)| p).collect();
                Ok(json!(paths))
            }
            "disconnectClient" => {
                let id = param_client_id(param)?;
                if !broker.registry().contains(id) {
                    return Err(BrokerError::InvalidParam(format!("No such client: {}", id)));
                }
                ctx.deliveries.push(Delivery::Disconnect(id));
                Ok(Value::Null)
            }
            _ => Err(BrokerError::not_found(ctx.path, method)),
        }
    }
}

/// `.broker/client`: one child per active client, each an alias of that
/// client's own node tree.
pub struct ClientDirNode;

impl NodeHandler for ClientDirNode {
    fn methods(&self) -> &'static [MethodDescriptor] {
        &[]
    }

    fn children(&self, ctx: &CallContext<'_>) -> Vec<String> {
        ctx.broker
            .registry()
            .active_ids()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    fn invoke(
        &self,
        method: &str,
        _param: Option<&Value>,
        ctx: &mut CallContext<'_>,
    ) -> Result<Value, BrokerError> {
        Err(BrokerError::not_found(ctx.path, method))
    }
}

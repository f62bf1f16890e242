//! `.broker/currentClient`: the caller's own session and subscriptions.

use serde_json::{json, Map, Value};
use shv_types::AccessLevel;
use std::time::Duration;

use super::{client_info, flags, param_str, CallContext, MethodDescriptor, NodeHandler};
use crate::domain::{BrokerError, RiPattern, SubscribeOutcome, UnsubscribeOutcome};

const METHODS: &[MethodDescriptor] = &[
    MethodDescriptor::new("info", flags::GETTER, AccessLevel::Browse, "Null", "{...}"),
    MethodDescriptor::new("subscribe", 0, AccessLevel::Browse, "String | [String, Int]", "Bool"),
    MethodDescriptor::new("unsubscribe", 0, AccessLevel::Browse, "String", "Bool"),
    MethodDescriptor::new("subscriptions", flags::GETTER, AccessLevel::Browse, "Null", "{Int | Null}"),
];

pub struct CurrentClientNode;

/// `"ri"` or `["ri", ttl_seconds | null]`. A zero TTL means none.
fn subscribe_param(param: Option<&Value>) -> Result<(RiPattern, Option<Duration>), BrokerError> {
    let invalid = || BrokerError::InvalidParam("Expected String or [String, Int]".into());
    match param {
        Some(Value::String(ri)) => Ok((RiPattern::parse(ri)?, None)),
        Some(Value::Array(items)) => {
            let ri = items.first().and_then(Value::as_str).ok_or_else(invalid)?;
            let ttl = match items.get(1) {
                None | Some(Value::Null) => None,
                Some(value) => match value.as_u64().ok_or_else(invalid)? {
                    0 => None,
                    secs => Some(Duration::from_secs(secs)),
                },
            };
            if items.len() > 2 {
                return Err(invalid());
            }
            Ok((RiPattern::parse(ri)?, ttl))
        }
        _ => Err(invalid()),
    }
}

impl NodeHandler for CurrentClientNode {
    fn methods(&self) -> &'static [MethodDescriptor] {
        METHODS
    }

    fn invoke(
        &self,
        method: &str,
        param: Option<&Value>,
        ctx: &mut CallContext<'_>,
    ) -> Result<Value, BrokerError> {
        let subscriptions = ctx.broker.subscriptions();
        match method {
            "info" => Ok(client_info(ctx.broker, ctx.caller, ctx.now).unwrap_or(Value::Null)),
            "subscribe" => {
                let (pattern, ttl) = subscribe_param(param)?;
                let outcome = subscriptions.subscribe(ctx.caller, pattern, ttl, ctx.now);
                Ok(json!(outcome == SubscribeOutcome::Added))
            }
            "unsubscribe" => {
                let ri = param_str(param, "RI")?;
                let outcome = subscriptions.unsubscribe(ctx.caller, ri);
                Ok(json!(outcome == UnsubscribeOutcome::Removed))
            }
            "subscriptions" => {
                let map: Map<String, Value> = subscriptions
                    .list(ctx.caller, ctx.now)
                    .into_iter()
                    .map(|(ri, ttl)| (ri, ttl.map_or(Value::Null, |d| json!(d.as_secs()))))
                    .collect();
                Ok(Value::Object(map))
            }
            _ => Err(BrokerError::not_found(ctx.path, method)),
        }
    }
}

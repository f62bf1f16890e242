//! `.app`: identification of the broker application.

use serde_json::{json, Value};
use shv_types::{AccessLevel, SHV_VERSION_MAJOR, SHV_VERSION_MINOR};

use super::{flags, CallContext, MethodDescriptor, NodeHandler};
use crate::domain::BrokerError;

const APP_NAME: &str = "shvbroker";

const METHODS: &[MethodDescriptor] = &[
    MethodDescriptor::new("shvVersionMajor", flags::GETTER, AccessLevel::Browse, "Null", "Int"),
    MethodDescriptor::new("shvVersionMinor", flags::GETTER, AccessLevel::Browse, "Null", "Int"),
    MethodDescriptor::new("name", flags::GETTER, AccessLevel::Browse, "Null", "String"),
    MethodDescriptor::new("version", flags::GETTER, AccessLevel::Browse, "Null", "String"),
    MethodDescriptor::new("ping", 0, AccessLevel::Browse, "Null", "Null"),
    MethodDescriptor::new("date", 0, AccessLevel::Browse, "Null", "DateTime"),
];

pub struct AppNode;

impl NodeHandler for AppNode {
    fn methods(&self) -> &'static [MethodDescriptor] {
        METHODS
    }

    fn invoke(
        &self,
        method: &str,
        _param: Option<&Value>,
        ctx: &mut CallContext<'_>,
    ) -> Result<Value, BrokerError> {
        match method {
            "shvVersionMajor" => Ok(json!(SHV_VERSION_MAJOR)),
            "shvVersionMinor" => Ok(json!(SHV_VERSION_MINOR)),
            "name" => Ok(json!(APP_NAME)),
            "version" => Ok(json!(crate::VERSION)),
            "ping" => Ok(Value::Null),
            "date" => Ok(json!(chrono::Utc::now().to_rfc3339())),
            _ => Err(BrokerError::not_found(ctx.path, method)),
        }
    }
}

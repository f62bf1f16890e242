//! # Broker-Local Nodes
//!
//! Nodes the broker answers itself. Each node exposes the same capability
//! set: list children, describe methods, invoke a method. `ls` and `dir` are
//! provided here for every node, at BROWSE level.
//!
//! | Path | Handler |
//! |------|---------|
//! | `""` and directories above mounts | [`DirectoryNode`] |
//! | `.app` | [`AppNode`] |
//! | `.broker` | [`BrokerNode`] |
//! | `.broker/currentClient` | [`CurrentClientNode`] |
//! | `.broker/client` | [`ClientDirNode`] |

mod app;
mod broker;
mod current_client;
mod directory;

pub use app::AppNode;
pub use broker::{client_info, BrokerNode, ClientDirNode};
pub use current_client::CurrentClientNode;
pub use directory::DirectoryNode;

use serde_json::{json, Value};
use shv_types::{AccessLevel, ConnectionId};

use crate::domain::{BrokerError, LocalNode, Timestamp};
use crate::service::{Broker, Delivery};

/// Method flags as reported by `dir`.
pub mod flags {
    pub const NOT_CALLABLE: u32 = 1 << 0;
    pub const GETTER: u32 = 1 << 1;
    pub const SETTER: u32 = 1 << 2;
    pub const LARGE_RESULT_HINT: u32 = 1 << 3;
    pub const USER_ID_REQUIRED: u32 = 1 << 5;
}

/// Description of one method of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: &'static str,
    pub flags: u32,
    /// Minimal access level needed to call the method
    pub access: AccessLevel,
    pub param: &'static str,
    pub result: &'static str,
}

impl MethodDescriptor {
    pub const fn new(
        name: &'static str,
        flags: u32,
        access: AccessLevel,
        param: &'static str,
        result: &'static str,
    ) -> Self {
        Self {
            name,
            flags,
            access,
            param,
            result,
        }
    }

    fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "flags": self.flags,
            "access": self.access.as_str(),
            "param": self.param,
            "result": self.result,
        })
    }
}

const LS: MethodDescriptor = MethodDescriptor::new(
    "ls",
    0,
    AccessLevel::Browse,
    "String | Null",
    "[String] | Bool",
);

const DIR: MethodDescriptor = MethodDescriptor::new(
    "dir",
    0,
    AccessLevel::Browse,
    "String | Null",
    "[{...}] | Bool",
);

/// Everything a handler may look at while serving one call.
pub struct CallContext<'a> {
    pub broker: &'a Broker,
    /// Connection that issued the request
    pub caller: ConnectionId,
    /// Normalised request path
    pub path: &'a str,
    pub node: &'a LocalNode,
    pub now: Timestamp,
    /// Side effects to carry out after the response
    pub deliveries: Vec<Delivery>,
}

/// Capability set of a broker-local node.
pub trait NodeHandler: Send + Sync {
    /// Methods besides `ls` and `dir`.
    fn methods(&self) -> &'static [MethodDescriptor];

    /// Child node names.
    fn children(&self, _ctx: &CallContext<'_>) -> Vec<String> {
        Vec::new()
    }

    /// Invoke one of [`NodeHandler::methods`].
    fn invoke(
        &self,
        method: &str,
        param: Option<&Value>,
        ctx: &mut CallContext<'_>,
    ) -> Result<Value, BrokerError>;
}

static DIRECTORY: DirectoryNode = DirectoryNode;
static APP: AppNode = AppNode;
static BROKER: BrokerNode = BrokerNode;
static CURRENT_CLIENT: CurrentClientNode = CurrentClientNode;
static CLIENT_DIR: ClientDirNode = ClientDirNode;

/// Handler serving a local node.
pub fn handler_for(node: &LocalNode) -> &'static dyn NodeHandler {
    match node {
        LocalNode::Root | LocalNode::Directory(_) => &DIRECTORY,
        LocalNode::App => &APP,
        LocalNode::Broker => &BROKER,
        LocalNode::CurrentClient => &CURRENT_CLIENT,
        LocalNode::ClientDir => &CLIENT_DIR,
    }
}

/// Descriptor of `method` on a node, including `ls` and `dir`.
pub fn describe(handler: &dyn NodeHandler, method: &str) -> Option<&'static MethodDescriptor> {
    match method {
        "ls" => Some(&LS),
        "dir" => Some(&DIR),
        _ => handler.methods().iter().find(|m| m.name == method),
    }
}

/// Call a method on a local node. Access must already be checked.
pub fn call(
    handler: &dyn NodeHandler,
    method: &str,
    param: Option<&Value>,
    ctx: &mut CallContext<'_>,
) -> Result<Value, BrokerError> {
    match method {
        "ls" => {
            let children = handler.children(ctx);
            match param {
                None | Some(Value::Null) => Ok(json!(children)),
                Some(Value::String(name)) => Ok(json!(children.iter().any(|c| c == name))),
                Some(_) => Err(BrokerError::InvalidParam("ls expects String or Null".into())),
            }
        }
        "dir" => match param {
            None | Some(Value::Null) | Some(Value::Bool(_)) => {
                let all: Vec<Value> = [&LS, &DIR]
                    .into_iter()
                    .chain(handler.methods())
                    .map(MethodDescriptor::to_value)
                    .collect();
                Ok(Value::Array(all))
            }
            Some(Value::String(name)) => Ok(json!(describe(handler, name).is_some())),
            Some(_) => Err(BrokerError::InvalidParam("dir expects String or Null".into())),
        },
        _ => handler.invoke(method, param, ctx),
    }
}

/// Extract a string parameter.
pub(crate) fn param_str<'p>(param: Option<&'p Value>, what: &str) -> Result<&'p str, BrokerError> {
    param
        .and_then(Value::as_str)
        .ok_or_else(|| BrokerError::InvalidParam(format!("Expected String {}", what)))
}

/// Extract a client id parameter.
pub(crate) fn param_client_id(param: Option<&Value>) -> Result<ConnectionId, BrokerError> {
    param
        .and_then(Value::as_u64)
        .and_then(|id| u32::try_from(id).ok())
        .map(ConnectionId)
        .ok_or_else(|| BrokerError::InvalidParam("Expected Int client id".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ls_and_dir_everywhere() {
        for node in [LocalNode::Root, LocalNode::App, LocalNode::Broker, LocalNode::CurrentClient] {
            let handler = handler_for(&node);
            assert_eq!(describe(handler, "ls").unwrap().access, AccessLevel::Browse);
            assert_eq!(describe(handler, "dir").unwrap().access, AccessLevel::Browse);
        }
    }

    #[test]
    fn test_describe_unknown_method() {
        assert!(describe(handler_for(&LocalNode::App), "reboot").is_none());
    }

    #[test]
    fn test_param_helpers() {
        let v = json!("abc");
        assert_eq!(param_str(Some(&v), "ri").unwrap(), "abc");
        assert!(param_str(None, "ri").is_err());
        assert_eq!(param_client_id(Some(&json!(4))).unwrap(), ConnectionId(4));
        assert!(param_client_id(Some(&json!(-1))).is_err());
    }
}

//! The root node and the virtual directories leading to mount points.

use serde_json::Value;

use super::{CallContext, MethodDescriptor, NodeHandler};
use crate::domain::BrokerError;

/// Lists `.app`, `.broker` and mount point segments; has no methods of its own.
pub struct DirectoryNode;

impl NodeHandler for DirectoryNode {
    fn methods(&self) -> &'static [MethodDescriptor] {
        &[]
    }

    fn children(&self, ctx: &CallContext<'_>) -> Vec<String> {
        ctx.broker.mounts().children(ctx.node)
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

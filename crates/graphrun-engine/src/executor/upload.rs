use futures::future::BoxFuture;
use serde_json::Value;

use graphrun_core::error::{GraphError, Result};
use graphrun_core::graph::{Node, NodeKind};
use graphrun_core::payload::UploadPayload;

use super::{NodeEnv, NodeExecutor};

/// Passes through the file descriptor attached to the node.
pub struct UploadExecutor;

impl NodeExecutor for UploadExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::Upload
    }

    fn execute<'a>(&'a self, _env: NodeEnv<'a>, node: &'a Node) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let payload: UploadPayload = node.payload()?;
            payload
                .uploaded_file
                .filter(|f| !f.is_null())
                .ok_or_else(|| GraphError::invalid_payload(&node.id, "no uploaded file"))
        })
    }
}

use futures::future::BoxFuture;
use serde_json::{json, Value};

use graphrun_core::error::{GraphError, Result};
use graphrun_core::graph::{Node, NodeKind};
use graphrun_core::log::LogPhase;
use graphrun_core::payload::{ToolKind, ToolPayload};

use super::{inputs_or_fallback, NodeEnv, NodeExecutor};
use crate::context::RunContext;

/// Runs a custom, built-in or MCP tool with the node's resolved inputs.
pub struct ToolExecutor;

impl NodeExecutor for ToolExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::Tool
    }

    fn execute<'a>(&'a self, env: NodeEnv<'a>, node: &'a Node) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let payload: ToolPayload = node.required_payload()?;
            if payload.kind == ToolKind::BuiltIn && payload.tool.id.is_none() {
                return Err(GraphError::invalid_payload(&node.id, "built-in tool has no id"));
            }

            let args = inputs_or_fallback(env, node, |output| match output {
                Value::String(s) => json!({ "input": s }),
                other => other,
            });

            let name = payload.tool.display_name();
            env.ctx.record(
                node,
                LogPhase::Info,
                format!("Invoking {} tool '{}'", kind_label(payload.kind), name),
            );

            invoke_tool(
                env.ctx,
                payload.kind,
                name,
                payload.tool.id.as_deref(),
                payload.tool.function_body.as_deref(),
                args,
            )
            .await
        })
    }
}

/// Dispatch a tool call to the collaborator for its kind.
///
/// Built-in tools are addressed by `id`, falling back to `name`.
pub(crate) async fn invoke_tool(
    ctx: &RunContext,
    kind: ToolKind,
    name: &str,
    id: Option<&str>,
    code: Option<&str>,
    args: Value,
) -> Result<Value> {
    match kind {
        ToolKind::Custom => {
            let code = code
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| GraphError::ToolExecution {
                    tool: name.to_string(),
                    message: "custom tool has no code".into(),
                })?;
            ctx.code_executor()?.execute(name, code, args).await
        }
        ToolKind::BuiltIn => {
            let id = id.unwrap_or(name);
            ctx.collaborators().tools.invoke_built_in(id, args).await
        }
        ToolKind::Mcp => Err(GraphError::UnsupportedTool(format!("mcp ({})", name))),
    }
}

fn kind_label(kind: ToolKind) -> &'static str {
    match kind {
        ToolKind::Custom => "custom",
        ToolKind::BuiltIn => "built-in",
        ToolKind::Mcp => "mcp",
    }
}

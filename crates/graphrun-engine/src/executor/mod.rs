//! Node executors: one strategy per node kind, dispatched through a registry.
//!
//! Executors receive a [`NodeEnv`] with the run context, the graph, the
//! registry itself (loops dispatch their body nodes through it) and the run's
//! initial inputs. [`run_node`] wraps every dispatch with start/complete/error
//! log entries and stores the output in the run context.

mod condition;
mod end;
mod llm;
mod looping;
mod rag;
mod start;
mod state;
mod tool;
mod transformer;
mod upload;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use graphrun_core::error::{GraphError, Result};
use graphrun_core::graph::{Graph, Node, NodeKind};
use graphrun_core::log::LogPhase;

use crate::binding::{is_empty, resolve_inputs};
use crate::context::RunContext;

pub use condition::ConditionExecutor;
pub use end::EndExecutor;
pub use llm::LlmExecutor;
pub use looping::LoopExecutor;
pub use rag::RagExecutor;
pub use start::StartExecutor;
pub use state::StateExecutor;
pub use tool::ToolExecutor;
pub use transformer::TransformerExecutor;
pub use upload::UploadExecutor;

/// Everything an executor can see while running one node.
#[derive(Clone, Copy)]
pub struct NodeEnv<'a> {
    pub ctx: &'a RunContext,
    pub graph: &'a Graph,
    pub registry: &'a ExecutorRegistry,
    pub initial_inputs: &'a Value,
}

/// Strategy for executing one node kind.
pub trait NodeExecutor: Send + Sync + 'static {
    fn kind(&self) -> NodeKind;

    fn execute<'a>(&'a self, env: NodeEnv<'a>, node: &'a Node) -> BoxFuture<'a, Result<Value>>;
}

/// Dispatch table from node kind to executor.
pub struct ExecutorRegistry {
    executors: HashMap<NodeKind, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor, replacing any previous one for the same kind.
    pub fn register(&mut self, executor: impl NodeExecutor) {
        self.executors.insert(executor.kind(), Arc::new(executor));
    }

    pub fn get(&self, kind: NodeKind) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(&kind).cloned()
    }

    /// Registry with an executor for every node kind.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(StartExecutor);
        registry.register(ToolExecutor);
        registry.register(LlmExecutor);
        registry.register(TransformerExecutor);
        registry.register(EndExecutor);
        registry.register(RagExecutor);
        registry.register(ConditionExecutor);
        registry.register(StateExecutor);
        registry.register(LoopExecutor);
        registry.register(UploadExecutor);
        registry
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Execute one node: log start, dispatch by kind, store the output, log the outcome.
///
/// Errors come back wrapped in `NodeFailed` naming this node.
pub async fn run_node(env: NodeEnv<'_>, node: &Node) -> Result<Value> {
    let ctx = env.ctx;
    ctx.record(node, LogPhase::Start, format!("Executing {} node", node.kind));

    let result = match env.registry.get(node.kind) {
        Some(executor) => executor.execute(env, node).await,
        None => Err(GraphError::UnsupportedNodeKind(node.kind)),
    };

    match result {
        Ok(output) => {
            ctx.set_output(&node.id, output.clone());
            ctx.record_with(
                node,
                LogPhase::Complete,
                format!("Completed {} node", node.kind),
                output.clone(),
            );
            Ok(output)
        }
        Err(e) => {
            ctx.record(node, LogPhase::Error, e.to_string());
            Err(e.in_node(&node.id, node.kind))
        }
    }
}

/// `selectedHandleId` of a condition or loop output.
pub fn selected_handle(output: &Value) -> Option<&str> {
    output.get("selectedHandleId").and_then(Value::as_str)
}

/// Resolved bindings, or the nearest predecessor's output when the node
/// declares no bindings. `wrap` shapes that output for the node's kind.
pub(crate) fn inputs_or_fallback(
    env: NodeEnv<'_>,
    node: &Node,
    wrap: impl FnOnce(Value) -> Value,
) -> Value {
    let resolved = resolve_inputs(env.ctx, env.graph, node);
    if !is_empty(&resolved) || node.has_bindings() {
        return resolved;
    }
    match predecessor_output(env, node) {
        Some(output) => wrap(output),
        None => resolved,
    }
}

/// Output of the first incoming edge's source that has produced one.
fn predecessor_output(env: NodeEnv<'_>, node: &Node) -> Option<Value> {
    env.graph
        .incoming(&node.id)
        .find_map(|edge| env.ctx.output(&edge.source))
}

/// Plain text of a value: strings as-is, everything else as JSON.
pub(crate) fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{collaborators, env_for};
    use graphrun_core::graph::Edge;
    use serde_json::json;

    #[test]
    fn test_defaults_cover_every_kind() {
        let registry = ExecutorRegistry::with_defaults();
        for kind in [
            NodeKind::Start,
            NodeKind::Tool,
            NodeKind::Llm,
            NodeKind::Transformer,
            NodeKind::End,
            NodeKind::Rag,
            NodeKind::Condition,
            NodeKind::State,
            NodeKind::Loop,
            NodeKind::Upload,
        ] {
            let executor = registry.get(kind).unwrap();
            assert_eq!(executor.kind(), kind);
        }
    }

    #[tokio::test]
    async fn test_unregistered_kind_fails_node() {
        let graph = Graph::new(vec![Node::new("s", NodeKind::Start, "Start")], vec![]).unwrap();
        let ctx = RunContext::new(collaborators());
        let registry = ExecutorRegistry::new();
        let inputs = json!({});
        let env = env_for(&ctx, &graph, &registry, &inputs);

        let err = run_node(env, graph.start_node()).await.unwrap_err();
        match err {
            GraphError::NodeFailed { node_id, source, .. } => {
                assert_eq!(node_id, "s");
                assert!(matches!(*source, GraphError::UnsupportedNodeKind(NodeKind::Start)));
            }
            other => panic!("unexpected error: {other}"),
        }
        let phases: Vec<_> = ctx.entries().iter().map(|e| e.phase).collect();
        assert_eq!(phases, vec![LogPhase::Start, LogPhase::Error]);
    }

    #[test]
    fn test_fallback_uses_predecessor_output() {
        let graph = Graph::new(
            vec![
                Node::new("s", NodeKind::Start, "Start"),
                Node::new("t", NodeKind::Tool, "Tool"),
            ],
            vec![Edge::new("s", "t")],
        )
        .unwrap();
        let ctx = RunContext::new(collaborators());
        let registry = ExecutorRegistry::new();
        let inputs = json!({});
        let env = env_for(&ctx, &graph, &registry, &inputs);

        let node = graph.node("t").unwrap();
        assert_eq!(inputs_or_fallback(env, node, |v| json!({ "wrapped": v })), json!({}));

        ctx.set_output("s", json!("hello"));
        assert_eq!(
            inputs_or_fallback(env, node, |v| json!({ "wrapped": v })),
            json!({ "wrapped": "hello" })
        );
    }

    #[test]
    fn test_no_fallback_when_bindings_declared() {
        let graph = Graph::new(
            vec![
                Node::new("s", NodeKind::Start, "Start"),
                Node::new("t", NodeKind::Tool, "Tool").with_binding("x", "Missing.value"),
            ],
            vec![Edge::new("s", "t")],
        )
        .unwrap();
        let ctx = RunContext::new(collaborators());
        ctx.set_output("s", json!("hello"));
        let registry = ExecutorRegistry::new();
        let inputs = json!({});
        let env = env_for(&ctx, &graph, &registry, &inputs);

        let node = graph.node("t").unwrap();
        assert_eq!(inputs_or_fallback(env, node, |v| v), json!({}));
        assert_eq!(ctx.entries()[0].phase, LogPhase::Warning);
    }
}

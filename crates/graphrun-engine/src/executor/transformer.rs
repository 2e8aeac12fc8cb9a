use std::collections::HashSet;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use graphrun_core::error::{GraphError, Result};
use graphrun_core::graph::{Node, NodeKind};
use graphrun_core::log::LogPhase;
use graphrun_core::payload::TransformerPayload;
use graphrun_core::types::{NodeDescriptor, TransformRequest, TransformSource};

use super::{NodeEnv, NodeExecutor};

/// Reshapes the outputs of every upstream node into the input expected by
/// the single downstream node, via the auto-transform service.
pub struct TransformerExecutor;

impl NodeExecutor for TransformerExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::Transformer
    }

    fn execute<'a>(&'a self, env: NodeEnv<'a>, node: &'a Node) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let payload: TransformerPayload = node.required_payload()?;
            let graph = env.graph;

            let mut seen = HashSet::new();
            let mut sources = Vec::new();
            for edge in graph.incoming(&node.id) {
                if !seen.insert(edge.source.as_str()) {
                    continue;
                }
                let source = graph
                    .node(&edge.source)
                    .ok_or_else(|| GraphError::NodeNotFound(edge.source.clone()))?;
                let output = env.ctx.output(&source.id).ok_or_else(|| {
                    GraphError::Transform(format!("source node {} has no output", source.id))
                })?;
                sources.push(TransformSource {
                    source_output: output,
                    source_node: describe(source, "Source node"),
                });
            }
            if sources.is_empty() {
                return Err(GraphError::Transform("transformer has no incoming edges".into()));
            }

            let target = graph
                .successors(&node.id)
                .first()
                .and_then(|id| graph.node(id))
                .ok_or_else(|| GraphError::Transform("transformer has no downstream node".into()))?;

            env.ctx.record(
                node,
                LogPhase::Info,
                format!("Transforming {} source(s) for {}", sources.len(), target.label()),
            );

            let request = TransformRequest {
                user_request: payload.user_request,
                sources,
                target_node: describe(target, "Target node"),
                target_input_type: schema_hint(target),
            };
            env.ctx.collaborators().transform.transform(request).await
        })
    }
}

/// Label plus the node's own `description`, or `fallback` when it has none.
fn describe(node: &Node, fallback: &str) -> NodeDescriptor {
    let description = node
        .data
        .payload
        .as_ref()
        .and_then(|p| p.get("description"))
        .and_then(Value::as_str)
        .filter(|d| !d.trim().is_empty())
        .unwrap_or(fallback);
    NodeDescriptor {
        name: node.label().to_string(),
        description: description.to_string(),
    }
}

/// Input shape the downstream node expects.
fn schema_hint(target: &Node) -> Value {
    let payload = target.data.payload.as_ref();
    let schema = match target.kind {
        NodeKind::Tool => payload.and_then(|p| p.pointer("/tool/input_schema")),
        NodeKind::End => payload.and_then(|p| p.get("output_schema")),
        _ => None,
    };
    schema
        .filter(|s| !s.is_null())
        .cloned()
        .unwrap_or_else(|| json!("string"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorRegistry;
    use crate::testing::{env_for, Harness};
    use graphrun_core::graph::{Edge, Graph};

    fn graph(target: Node) -> Graph {
        Graph::new(
            vec![
                Node::new("s", NodeKind::Start, "Start"),
                Node::new("a", NodeKind::Tool, "Weather")
                    .with_payload(json!({ "description": "Current weather by city" })),
                Node::new("x", NodeKind::Transformer, "Merge")
                    .with_payload(json!({ "userRequest": "combine into one query" })),
                target,
            ],
            vec![
                Edge::new("s", "a"),
                Edge::new("s", "x"),
                Edge::new("a", "x"),
                Edge::new("x", "t"),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_collects_every_source_and_schema_hint() {
        let h = Harness::new();
        let graph = graph(Node::new("t", NodeKind::Tool, "Search").with_payload(json!({
            "type": "built-in",
            "tool": { "id": "s", "input_schema": { "type": "object" } }
        })));
        let ctx = h.context();
        ctx.set_output("s", json!({ "city": "Oslo" }));
        ctx.set_output("a", json!({ "temp": 3 }));
        let registry = ExecutorRegistry::new();
        let inputs = json!({});

        TransformerExecutor
            .execute(env_for(&ctx, &graph, &registry, &inputs), graph.node("x").unwrap())
            .await
            .unwrap();

        let requests = h.transform.requests();
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert_eq!(req.user_request, "combine into one query");
        assert_eq!(req.sources.len(), 2);
        assert_eq!(req.sources[1].source_node.name, "Weather");
        assert_eq!(req.sources[1].source_node.description, "Current weather by city");
        assert_eq!(req.sources[0].source_node.description, "Source node");
        assert_eq!(req.target_node.name, "Search");
        assert_eq!(req.target_node.description, "Target node");
        assert_eq!(req.target_input_type, json!({ "type": "object" }));
    }

    #[tokio::test]
    async fn test_non_tool_target_gets_string_hint() {
        let h = Harness::new();
        let graph = graph(Node::new("t", NodeKind::Llm, "Chat"));
        let ctx = h.context();
        ctx.set_output("s", json!({}));
        ctx.set_output("a", json!({}));
        let registry = ExecutorRegistry::new();
        let inputs = json!({});

        TransformerExecutor
            .execute(env_for(&ctx, &graph, &registry, &inputs), graph.node("x").unwrap())
            .await
            .unwrap();
        assert_eq!(h.transform.requests()[0].target_input_type, json!("string"));
    }

    #[tokio::test]
    async fn test_missing_source_output_fails() {
        let h = Harness::new();
        let graph = graph(Node::new("t", NodeKind::End, "End"));
        let ctx = h.context();
        ctx.set_output("s", json!({}));
        let registry = ExecutorRegistry::new();
        let inputs = json!({});

        let err = TransformerExecutor
            .execute(env_for(&ctx, &graph, &registry, &inputs), graph.node("x").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Transform(_)));
    }

    #[tokio::test]
    async fn test_missing_downstream_fails() {
        let h = Harness::new();
        let graph = Graph::new(
            vec![
                Node::new("s", NodeKind::Start, "Start"),
                Node::new("x", NodeKind::Transformer, "Merge").with_payload(json!({ "userRequest": "x" })),
            ],
            vec![Edge::new("s", "x")],
        )
        .unwrap();
        let ctx = h.context();
        ctx.set_output("s", json!({}));
        let registry = ExecutorRegistry::new();
        let inputs = json!({});

        let err = TransformerExecutor
            .execute(env_for(&ctx, &graph, &registry, &inputs), graph.node("x").unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("downstream"));
    }
}

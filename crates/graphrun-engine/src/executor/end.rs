use futures::future::BoxFuture;
use serde_json::{json, Value};

use graphrun_core::error::Result;
use graphrun_core::graph::{Node, NodeKind};
use graphrun_core::payload::{EndPayload, OutputType};

use super::{inputs_or_fallback, text_of, NodeEnv, NodeExecutor};

/// Shapes the run's final result.
pub struct EndExecutor;

impl NodeExecutor for EndExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::End
    }

    fn execute<'a>(&'a self, env: NodeEnv<'a>, node: &'a Node) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let payload: EndPayload = node.payload()?;
            match payload.output_type {
                OutputType::Json => Ok(inputs_or_fallback(env, node, |output| {
                    json!({ "data": output })
                })),
                OutputType::Text => {
                    let inputs = inputs_or_fallback(env, node, text_fallback);
                    let message = match inputs.get("message") {
                        Some(message) => text_of(message),
                        None => inputs.to_string(),
                    };
                    Ok(json!({
                        "message": message,
                        "timestamp": chrono::Utc::now().timestamp_millis(),
                    }))
                }
            }
        })
    }
}

/// Pick the message out of a predecessor's output.
fn text_fallback(output: Value) -> Value {
    let message = match &output {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("response") {
            Some(Value::String(s)) => s.clone(),
            _ => match output.pointer("/lastMessage/content") {
                Some(content) => text_of(content),
                None => output.to_string(),
            },
        },
        other => other.to_string(),
    };
    json!({ "message": message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorRegistry;
    use crate::testing::{env_for, Harness};
    use graphrun_core::graph::{Edge, Graph};

    fn graph(end: Node) -> Graph {
        Graph::new(
            vec![
                Node::new("s", NodeKind::Start, "Start"),
                Node::new("m", NodeKind::Llm, "Chat"),
                end,
            ],
            vec![Edge::new("s", "m"), Edge::new("m", "e")],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_text_from_llm_response() {
        let h = Harness::new();
        let graph = graph(Node::new("e", NodeKind::End, "End"));
        let ctx = h.context();
        ctx.set_output("m", json!({ "response": "All done" }));
        let registry = ExecutorRegistry::new();
        let inputs = json!({});

        let out = EndExecutor
            .execute(env_for(&ctx, &graph, &registry, &inputs), graph.node("e").unwrap())
            .await
            .unwrap();
        assert_eq!(out["message"], "All done");
        assert!(out["timestamp"].is_i64());
    }

    #[tokio::test]
    async fn test_text_from_binding() {
        let h = Harness::new();
        let graph = graph(Node::new("e", NodeKind::End, "End").with_binding("message", "Chat.response"));
        let ctx = h.context();
        ctx.set_output("m", json!({ "response": "bound" }));
        let registry = ExecutorRegistry::new();
        let inputs = json!({});

        let out = EndExecutor
            .execute(env_for(&ctx, &graph, &registry, &inputs), graph.node("e").unwrap())
            .await
            .unwrap();
        assert_eq!(out["message"], "bound");
    }

    #[tokio::test]
    async fn test_json_returns_resolved_inputs() {
        let h = Harness::new();
        let graph = graph(
            Node::new("e", NodeKind::End, "End")
                .with_payload(json!({ "output_type": "JSON" }))
                .with_binding("answer.text", "Chat.response"),
        );
        let ctx = h.context();
        ctx.set_output("m", json!({ "response": "42" }));
        let registry = ExecutorRegistry::new();
        let inputs = json!({});

        let out = EndExecutor
            .execute(env_for(&ctx, &graph, &registry, &inputs), graph.node("e").unwrap())
            .await
            .unwrap();
        assert_eq!(out, json!({ "answer": { "text": "42" } }));
    }

    #[tokio::test]
    async fn test_json_fallback_wraps_data() {
        let h = Harness::new();
        let graph = graph(Node::new("e", NodeKind::End, "End").with_payload(json!({ "output_type": "JSON" })));
        let ctx = h.context();
        ctx.set_output("m", json!([1, 2]));
        let registry = ExecutorRegistry::new();
        let inputs = json!({});

        let out = EndExecutor
            .execute(env_for(&ctx, &graph, &registry, &inputs), graph.node("e").unwrap())
            .await
            .unwrap();
        assert_eq!(out, json!({ "data": [1, 2] }));
    }

    #[test]
    fn test_text_fallback_extracts_message() {
        assert_eq!(text_fallback(json!("hi"))["message"], "hi");
        assert_eq!(
            text_fallback(json!({ "lastMessage": { "content": "last" } }))["message"],
            "last"
        );
        assert_eq!(text_fallback(json!({ "k": 1 }))["message"], "{\"k\":1}");
    }
}

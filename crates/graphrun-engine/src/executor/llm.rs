use futures::future::{join_all, BoxFuture};
use serde_json::{json, Value};

use graphrun_core::error::{GraphError, Result};
use graphrun_core::graph::{Node, NodeKind};
use graphrun_core::log::LogPhase;
use graphrun_core::payload::{LlmPayload, LlmToolSpec, OutputType};
use graphrun_core::types::{ChatMessage, ChatRequest, ChatResponse, ToolCall};

use super::tool::invoke_tool;
use super::{inputs_or_fallback, text_of, NodeEnv, NodeExecutor};
use crate::context::RunContext;

/// Model completion with tool-call continuation.
///
/// The first round sends the user message. When the model asks for tools,
/// every requested call runs concurrently and the next round sends only the
/// `tool` result messages with the returned checkpoint id; the service
/// resumes the conversation from that checkpoint. Each execution of the node
/// gets its own session id.
pub struct LlmExecutor;

impl NodeExecutor for LlmExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::Llm
    }

    fn execute<'a>(&'a self, env: NodeEnv<'a>, node: &'a Node) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let payload: LlmPayload = node.payload()?;
            let ctx = env.ctx;

            let inputs = inputs_or_fallback(env, node, |output| match output {
                Value::String(s) => json!({ "userMessage": s }),
                other => other,
            });
            let content = match inputs.get("userMessage") {
                Some(Value::String(s)) => s.clone(),
                _ => inputs.to_string(),
            };

            let model_node = node.data.payload.clone().unwrap_or(Value::Null);
            let session_id = format!(
                "workflow-{}-{}",
                node.id,
                chrono::Utc::now().timestamp_millis()
            );
            let mut messages = vec![ChatMessage::user(content)];
            let mut checkpoint_id = None;
            let max_rounds = ctx.settings().max_tool_rounds;

            for round in 0..max_rounds {
                let request = ChatRequest {
                    session_id: session_id.clone(),
                    model_node: model_node.clone(),
                    messages: std::mem::take(&mut messages),
                    checkpoint_id: checkpoint_id.clone(),
                };

                match ctx.collaborators().model.complete_chat(request).await? {
                    ChatResponse::Final { message, parsed } => {
                        return Ok(shape_output(payload.output_type, message, parsed));
                    }
                    ChatResponse::ToolCalls {
                        calls,
                        checkpoint_id: next,
                    } => {
                        ctx.record_with(
                            node,
                            LogPhase::Info,
                            format!("Model requested {} tool call(s)", calls.len()),
                            json!({
                                "round": round + 1,
                                "tools": calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                            }),
                        );

                        let results =
                            join_all(calls.iter().map(|call| call_tool(ctx, &payload, call))).await;
                        for (call, result) in calls.iter().zip(results) {
                            let output = result?;
                            messages.push(ChatMessage::tool_result(
                                &call.name,
                                &call.id,
                                text_of(&output),
                            ));
                        }
                        checkpoint_id = next;
                    }
                }
            }

            Err(GraphError::ModelResponse(format!(
                "no final answer after {} tool rounds",
                max_rounds
            )))
        })
    }
}

/// Run one model-requested tool call against the node's configured tools.
async fn call_tool(ctx: &RunContext, payload: &LlmPayload, call: &ToolCall) -> Result<Value> {
    let spec: &LlmToolSpec = payload
        .tools
        .iter()
        .find(|t| t.name == call.name)
        .ok_or_else(|| GraphError::ToolNotFound(call.name.clone()))?;

    invoke_tool(
        ctx,
        spec.kind,
        &spec.name,
        spec.id.as_deref(),
        spec.function_code.as_deref(),
        call.args.clone(),
    )
    .await
}

fn shape_output(output_type: OutputType, message: Option<String>, parsed: Option<Value>) -> Value {
    match (output_type, parsed) {
        (OutputType::Json, Some(parsed)) => parsed,
        _ => json!({ "response": message.unwrap_or_default() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorRegistry;
    use crate::testing::{env_for, Harness};
    use graphrun_core::graph::{Edge, Graph};
    use graphrun_core::types::ChatRole;

    fn graph(llm: Node) -> Graph {
        Graph::new(
            vec![Node::new("s", NodeKind::Start, "Start"), llm],
            vec![Edge::new("s", "m")],
        )
        .unwrap()
    }

    fn tool_call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    #[tokio::test]
    async fn test_text_response() {
        let h = Harness::new();
        h.model.push(ChatResponse::Final {
            message: Some("Hello!".into()),
            parsed: None,
        });
        let graph = graph(
            Node::new("m", NodeKind::Llm, "Chat")
                .with_payload(json!({ "model": "gpt" }))
                .with_binding("userMessage", "Start.question"),
        );
        let ctx = h.context();
        ctx.set_output("s", json!({ "question": "hi?" }));
        let registry = ExecutorRegistry::new();
        let inputs = json!({});

        let out = LlmExecutor
            .execute(env_for(&ctx, &graph, &registry, &inputs), graph.node("m").unwrap())
            .await
            .unwrap();
        assert_eq!(out, json!({ "response": "Hello!" }));

        let requests = h.model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[0].content, "hi?");
        assert_eq!(requests[0].model_node["model"], "gpt");
    }

    #[tokio::test]
    async fn test_json_response_uses_parsed() {
        let h = Harness::new();
        h.model.push(ChatResponse::Final {
            message: Some("{\"score\":3}".into()),
            parsed: Some(json!({ "score": 3 })),
        });
        let graph = graph(Node::new("m", NodeKind::Llm, "Rate").with_payload(json!({ "output_type": "JSON" })));
        let ctx = h.context();
        ctx.set_output("s", json!("rate this"));
        let registry = ExecutorRegistry::new();
        let inputs = json!({});

        let out = LlmExecutor
            .execute(env_for(&ctx, &graph, &registry, &inputs), graph.node("m").unwrap())
            .await
            .unwrap();
        assert_eq!(out, json!({ "score": 3 }));
        assert_eq!(h.model.requests()[0].messages[0].content, "rate this");
    }

    #[tokio::test]
    async fn test_tool_round_trip_carries_checkpoint() {
        let h = Harness::new();
        h.model.push(ChatResponse::ToolCalls {
            calls: vec![
                tool_call("c1", "search", json!({ "q": "rust" })),
                tool_call("c2", "add", json!({ "a": 1, "b": 2 })),
            ],
            checkpoint_id: Some("cp-1".into()),
        });
        h.model.push(ChatResponse::Final {
            message: Some("Done".into()),
            parsed: None,
        });
        let graph = graph(Node::new("m", NodeKind::Llm, "Agent").with_payload(json!({
            "tools": [
                { "name": "search", "type": "built-in", "id": "web-search" },
                { "name": "add", "type": "custom", "functionCode": "return params.a + params.b;" }
            ]
        })));
        let ctx = h.context();
        ctx.set_output("s", json!("go"));
        let registry = ExecutorRegistry::new();
        let inputs = json!({});

        let out = LlmExecutor
            .execute(env_for(&ctx, &graph, &registry, &inputs), graph.node("m").unwrap())
            .await
            .unwrap();
        assert_eq!(out["response"], "Done");

        assert_eq!(h.tools.calls()[0].0, "web-search");
        assert_eq!(h.code.calls()[0].0, "add");

        let requests = h.model.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].checkpoint_id.as_deref(), Some("cp-1"));
        // The continuation resumes from the checkpoint with tool results only.
        let roles: Vec<_> = requests[1].messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![ChatRole::Tool, ChatRole::Tool]);
        assert_eq!(requests[1].messages[0].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(requests[1].messages[1].tool_call_id.as_deref(), Some("c2"));

        assert!(requests[0].session_id.starts_with("workflow-m-"));
        assert_eq!(requests[0].session_id, requests[1].session_id);
        assert_ne!(requests[0].session_id, ctx.run_id());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_fatal() {
        let h = Harness::new();
        h.model.push(ChatResponse::ToolCalls {
            calls: vec![tool_call("c1", "nope", json!({}))],
            checkpoint_id: None,
        });
        let graph = graph(Node::new("m", NodeKind::Llm, "Agent").with_payload(json!({ "tools": [] })));
        let ctx = h.context();
        ctx.set_output("s", json!("go"));
        let registry = ExecutorRegistry::new();
        let inputs = json!({});

        let err = LlmExecutor
            .execute(env_for(&ctx, &graph, &registry, &inputs), graph.node("m").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::ToolNotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_tool_rounds_are_bounded() {
        let h = Harness::new();
        for i in 0..3 {
            h.model.push(ChatResponse::ToolCalls {
                calls: vec![tool_call(&format!("c{i}"), "search", json!({}))],
                checkpoint_id: None,
            });
        }
        let graph = graph(Node::new("m", NodeKind::Llm, "Agent").with_payload(json!({
            "tools": [{ "name": "search", "type": "built-in", "id": "web-search" }]
        })));
        let ctx = h.context().with_settings(graphrun_core::config::EngineConfig {
            max_tool_rounds: 2,
            ..Default::default()
        });
        ctx.set_output("s", json!("go"));
        let registry = ExecutorRegistry::new();
        let inputs = json!({});

        let err = LlmExecutor
            .execute(env_for(&ctx, &graph, &registry, &inputs), graph.node("m").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::ModelResponse(_)));
        assert_eq!(h.tools.calls().len(), 2);
    }
}

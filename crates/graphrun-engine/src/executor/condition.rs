use futures::future::BoxFuture;
use serde_json::{json, Value};

use graphrun_core::error::Result;
use graphrun_core::graph::{Node, NodeKind};
use graphrun_core::log::LogPhase;
use graphrun_core::payload::ConditionPayload;

use super::{NodeEnv, NodeExecutor};
use crate::expr::is_truthy;

/// Selects the first branch whose expression is truthy, else the default handle.
///
/// Blank or failing expressions are skipped. This executor never fails on
/// evaluation.
pub struct ConditionExecutor;

impl NodeExecutor for ConditionExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::Condition
    }

    fn execute<'a>(&'a self, env: NodeEnv<'a>, node: &'a Node) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let payload: ConditionPayload = node.payload()?;
            let ctx = env.ctx;
            let context = ctx.eval_context(env.graph);

            for branch in &payload.conditions {
                let Some(expression) = branch.expression.as_deref().filter(|e| !e.trim().is_empty())
                else {
                    continue;
                };
                match ctx.evaluator().evaluate(expression, &context) {
                    Ok(value) if is_truthy(&value) => {
                        ctx.record(
                            node,
                            LogPhase::Info,
                            format!("Condition '{}' matched", expression),
                        );
                        return Ok(json!({ "selectedHandleId": branch.output_handle_id }));
                    }
                    Ok(_) => {}
                    Err(e) => ctx.record(
                        node,
                        LogPhase::Warning,
                        format!("Condition '{}' skipped: {}", expression, e),
                    ),
                }
            }

            ctx.record(node, LogPhase::Info, "No condition matched, taking default branch");
            Ok(json!({ "selectedHandleId": payload.default_handle(&node.id) }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorRegistry;
    use crate::testing::{env_for, Harness};
    use graphrun_core::graph::Graph;

    fn graph(payload: Value) -> Graph {
        Graph::new(
            vec![
                Node::new("s", NodeKind::Start, "Start"),
                Node::new("c", NodeKind::Condition, "Check").with_payload(payload),
            ],
            vec![],
        )
        .unwrap()
    }

    async fn select(payload: Value, x: i64) -> Value {
        let h = Harness::new();
        let graph = graph(payload);
        let ctx = h.context();
        ctx.set_state("x", json!(x));
        let registry = ExecutorRegistry::new();
        let inputs = json!({});
        ConditionExecutor
            .execute(env_for(&ctx, &graph, &registry, &inputs), graph.node("c").unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_truthy_branch_wins() {
        let payload = json!({
            "conditions": [
                { "expression": "state.x > 5", "outputHandleId": "A" },
                { "expression": "true", "outputHandleId": "B" }
            ]
        });
        assert_eq!(select(payload.clone(), 10).await["selectedHandleId"], "A");
        assert_eq!(select(payload, 1).await["selectedHandleId"], "B");
    }

    #[tokio::test]
    async fn test_failing_and_blank_expressions_skipped() {
        let payload = json!({
            "conditions": [
                { "expression": "", "outputHandleId": "blank" },
                { "expression": "Missing.flag", "outputHandleId": "broken" },
                { "expression": "state.x == 3", "outputHandleId": "three" }
            ]
        });
        assert_eq!(select(payload, 3).await["selectedHandleId"], "three");
    }

    #[tokio::test]
    async fn test_default_handle() {
        let payload = json!({ "conditions": [ { "expression": "false", "outputHandleId": "A" } ] });
        assert_eq!(select(payload, 0).await["selectedHandleId"], "c-output-default");

        let payload = json!({ "conditions": [], "defaultOutputHandleId": "else" });
        assert_eq!(select(payload, 0).await["selectedHandleId"], "else");
    }
}

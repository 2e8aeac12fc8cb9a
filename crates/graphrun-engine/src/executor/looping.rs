use futures::future::BoxFuture;
use serde_json::{json, Value};

use graphrun_core::error::Result;
use graphrun_core::graph::{Node, NodeKind};
use graphrun_core::log::LogPhase;
use graphrun_core::payload::{LoopOutcome, LoopPayload};

use super::{NodeEnv, NodeExecutor};
use crate::expr::is_truthy;
use crate::walk::walk_body;

/// Repeats the loop body until the exit condition holds or the iteration cap is hit.
pub struct LoopExecutor;

impl NodeExecutor for LoopExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::Loop
    }

    fn execute<'a>(&'a self, env: NodeEnv<'a>, node: &'a Node) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let payload: LoopPayload = node.payload()?;
            let ctx = env.ctx;
            let max_iterations = payload
                .max_iterations
                .unwrap_or(ctx.settings().default_max_iterations);
            let start_handle = payload.start_handle(&node.id);
            let end_handle = payload.end_handle(&node.id);

            let Some(entry) = env.graph.outgoing_by_handle(&node.id, &start_handle) else {
                ctx.record(
                    node,
                    LogPhase::Error,
                    format!("No node connected to loop start handle {}", start_handle),
                );
                return Ok(loop_output(&node.id, LoopOutcome::Exit, 0));
            };

            let mut iterations = 0;
            let mut outcome = LoopOutcome::MaxReached;
            while iterations < max_iterations {
                ctx.record(
                    node,
                    LogPhase::Info,
                    format!("Iteration {} of {}", iterations + 1, max_iterations),
                );
                walk_body(env, node, &entry.target, &end_handle).await?;
                iterations += 1;

                if let Some(expression) = payload.exit_expression() {
                    let context = ctx.eval_context(env.graph);
                    match ctx.evaluator().evaluate(expression, &context) {
                        Ok(value) if is_truthy(&value) => {
                            outcome = LoopOutcome::Exit;
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => ctx.record(
                            node,
                            LogPhase::Warning,
                            format!("Exit condition failed, continuing: {}", e),
                        ),
                    }
                }
            }

            ctx.record(
                node,
                LogPhase::Info,
                format!("Loop finished ({}) after {} iteration(s)", outcome.as_str(), iterations),
            );
            Ok(loop_output(&node.id, outcome, iterations))
        })
    }
}

fn loop_output(node_id: &str, outcome: LoopOutcome, iterations: u32) -> Value {
    json!({
        "selectedHandleId": outcome.handle(node_id),
        "reason": outcome.as_str(),
        "iterations": iterations,
    })
}

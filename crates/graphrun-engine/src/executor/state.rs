use futures::future::BoxFuture;
use serde_json::Value;

use graphrun_core::error::Result;
use graphrun_core::graph::{Node, NodeKind};
use graphrun_core::log::LogPhase;
use graphrun_core::payload::StatePayload;

use super::{NodeEnv, NodeExecutor};

/// Applies key updates to the run's global state and returns the new state.
///
/// Bindings are evaluated against the context as it was when the node
/// started, so updates in one node do not see each other.
pub struct StateExecutor;

impl NodeExecutor for StateExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::State
    }

    fn execute<'a>(&'a self, env: NodeEnv<'a>, node: &'a Node) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let payload: StatePayload = node.payload()?;
            let ctx = env.ctx;
            let context = ctx.eval_context(env.graph);

            for update in &payload.state_updates {
                let key = update.key.trim();
                if key.is_empty() {
                    ctx.record(node, LogPhase::Warning, "State update with empty key skipped");
                    continue;
                }

                let value = match update.binding.as_deref().filter(|b| !b.trim().is_empty()) {
                    Some(binding) => match ctx.evaluator().evaluate(binding, &context) {
                        Ok(value) => value,
                        Err(e) => {
                            ctx.record(
                                node,
                                LogPhase::Warning,
                                format!("State update for '{}' skipped: {}", key, e),
                            );
                            continue;
                        }
                    },
                    None => update.value.clone().unwrap_or(Value::Null),
                };
                ctx.set_state(key, value);
            }

            Ok(Value::Object(ctx.state()))
        })
    }
}

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

use graphrun_core::error::Result;
use graphrun_core::graph::{Node, NodeKind};

use super::{NodeEnv, NodeExecutor};

/// Emits the run's initial inputs, stamped with the node type and a timestamp.
pub struct StartExecutor;

impl NodeExecutor for StartExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::Start
    }

    fn execute<'a>(&'a self, env: NodeEnv<'a>, _node: &'a Node) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let mut output = Map::new();
            output.insert("type".into(), json!("start"));
            output.insert(
                "timestamp".into(),
                json!(chrono::Utc::now().timestamp_millis()),
            );

            match env.initial_inputs {
                Value::Object(inputs) => {
                    for (key, value) in inputs {
                        output.insert(key.clone(), value.clone());
                    }
                }
                Value::Null => {}
                other => {
                    output.insert("input".into(), other.clone());
                }
            }

            Ok(Value::Object(output))
        })
    }
}

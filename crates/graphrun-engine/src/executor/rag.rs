use futures::future::BoxFuture;
use serde_json::{json, Value};

use graphrun_core::error::{GraphError, Result};
use graphrun_core::graph::{Node, NodeKind};
use graphrun_core::log::LogPhase;
use graphrun_core::payload::{RagPayload, DEFAULT_SEARCH_TYPE, DEFAULT_TOP_K};
use graphrun_core::types::RetrievalQuery;

use super::{inputs_or_fallback, NodeEnv, NodeExecutor};

/// Retrieves context text from a storage for the node's query.
pub struct RagExecutor;

impl NodeExecutor for RagExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::Rag
    }

    fn execute<'a>(&'a self, env: NodeEnv<'a>, node: &'a Node) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let payload: RagPayload = node.payload()?;
            let storage_id = payload
                .storage_id
                .filter(|id| !id.trim().is_empty())
                .ok_or_else(|| GraphError::invalid_payload(&node.id, "rag node has no storage_id"))?;

            let inputs = inputs_or_fallback(env, node, query_fallback);
            let query = inputs
                .get("query")
                .and_then(Value::as_str)
                .filter(|q| !q.trim().is_empty())
                .ok_or_else(|| GraphError::Retrieval("query must be a non-empty string".into()))?
                .to_string();

            let search_type = payload
                .search_type
                .unwrap_or_else(|| DEFAULT_SEARCH_TYPE.to_string());
            let mmr_lambda = if search_type == "mmr" {
                payload.mmr_lambda
            } else {
                None
            };
            let request = RetrievalQuery {
                storage_id: storage_id.clone(),
                query,
                top_k: payload.top_k.unwrap_or(DEFAULT_TOP_K),
                search_type,
                file_names: payload.file_names,
                mmr_lambda,
                filter_metadata: payload.filter_metadata,
            };

            env.ctx.record_with(
                node,
                LogPhase::Info,
                format!("Searching storage {}", storage_id),
                json!({ "top_k": request.top_k, "search_type": request.search_type }),
            );
            let context = env.ctx.collaborators().retrieval.query(request).await?;
            env.ctx.record(
                node,
                LogPhase::Info,
                format!("Retrieved {} characters of context", context.chars().count()),
            );

            Ok(Value::String(context))
        })
    }
}

fn query_fallback(output: Value) -> Value {
    let query = match &output {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("response").or_else(|| map.get("userMessage")) {
            Some(Value::String(s)) => s.clone(),
            _ => output.to_string(),
        },
        other => other.to_string(),
    };
    json!({ "query": query })
}

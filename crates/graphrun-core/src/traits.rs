use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::{EvalError, Result};
use crate::log::LogEntry;
use crate::types::*;

/// Evaluates binding, condition and state expressions.
///
/// `context` maps node labels to their outputs, plus the reserved `state` key
/// holding the global state object. Evaluation is synchronous.
pub trait ExpressionEvaluator: Send + Sync + 'static {
    fn evaluate(
        &self,
        expression: &str,
        context: &serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<serde_json::Value, EvalError>;
}

/// Access token provider for remote services.
pub trait TokenProvider: Send + Sync + 'static {
    fn token(&self) -> BoxFuture<'_, Result<String>>;
}

/// Model service: chat completion with tool-call continuation.
pub trait ModelService: Send + Sync + 'static {
    fn complete_chat(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatResponse>>;
}

/// Remote built-in tools, addressed by tool id.
pub trait ToolInvoker: Send + Sync + 'static {
    fn invoke_built_in(
        &self,
        tool_id: &str,
        args: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value>>;
}

/// Sandbox for user-supplied tool code.
///
/// Implementations run untrusted code and are expected to isolate it
/// (separate process, cleared environment, resource limits).
pub trait CodeExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        tool_name: &str,
        code: &str,
        args: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value>>;
}

/// Retrieval (RAG) service returning context text for a query.
pub trait RetrievalService: Send + Sync + 'static {
    fn query(&self, query: RetrievalQuery) -> BoxFuture<'_, Result<String>>;
}

/// Auto-transform service reshaping upstream outputs for a downstream node.
pub trait TransformService: Send + Sync + 'static {
    fn transform(&self, request: TransformRequest) -> BoxFuture<'_, Result<serde_json::Value>>;
}

/// Observer of log entries. Must not panic; there is no error channel back.
pub trait LogSink: Send + Sync + 'static {
    fn append(&self, entry: &LogEntry);
}

/// Handles to the external services a run may call.
#[derive(Clone)]
pub struct Collaborators {
    pub evaluator: Arc<dyn ExpressionEvaluator>,
    pub model: Arc<dyn ModelService>,
    pub tools: Arc<dyn ToolInvoker>,
    /// Sandbox for custom tool code. Custom tools fail when this is unset.
    pub code: Option<Arc<dyn CodeExecutor>>,
    pub retrieval: Arc<dyn RetrievalService>,
    pub transform: Arc<dyn TransformService>,
}

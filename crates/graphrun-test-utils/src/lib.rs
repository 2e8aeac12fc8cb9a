//! Deterministic collaborators and graph fixtures for graphrun tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use graphrun_core::error::{GraphError, Result};
use graphrun_core::graph::{Edge, Graph, Node, NodeKind};
use graphrun_core::log::LogEntry;
use graphrun_core::traits::*;
use graphrun_core::types::*;

// ── Model ───────────────────────────────────────────────────────

/// Model service that replays queued responses and records every request.
///
/// Once the queue is empty it answers `Final { message: "done" }`.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<ChatResponse>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: ChatResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_error(&self, message: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(GraphError::ModelService(message.into())));
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl ModelService for ScriptedModel {
    fn complete_chat(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatResponse>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request);
            let next = self.responses.lock().unwrap().pop_front();
            next.unwrap_or_else(|| {
                Ok(ChatResponse::Final {
                    message: Some("done".into()),
                    parsed: None,
                })
            })
        })
    }
}

// ── Tools ───────────────────────────────────────────────────────

/// Built-in tool invoker that records calls.
///
/// Unless told otherwise a call returns `{ tool, args, call }`, where `call`
/// is the 1-based count of calls to that tool so far.
#[derive(Default)]
pub struct RecordingTools {
    calls: Mutex<Vec<(String, Value)>>,
    responses: Mutex<HashMap<String, Value>>,
    delays: Mutex<HashMap<String, Duration>>,
    failures: Mutex<HashMap<String, String>>,
}

impl RecordingTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, tool_id: &str, value: Value) {
        self.responses.lock().unwrap().insert(tool_id.into(), value);
    }

    pub fn delay(&self, tool_id: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(tool_id.into(), delay);
    }

    pub fn fail(&self, tool_id: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(tool_id.into(), message.into());
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, tool_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == tool_id)
            .count()
    }
}

impl ToolInvoker for RecordingTools {
    fn invoke_built_in(&self, tool_id: &str, args: Value) -> BoxFuture<'_, Result<Value>> {
        let tool_id = tool_id.to_string();
        Box::pin(async move {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((tool_id.clone(), args.clone()));
                calls.iter().filter(|(id, _)| *id == tool_id).count()
            };

            let delay = self.delays.lock().unwrap().get(&tool_id).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if let Some(message) = self.failures.lock().unwrap().get(&tool_id) {
                return Err(GraphError::ToolExecution {
                    tool: tool_id.clone(),
                    message: message.clone(),
                });
            }

            let response = self.responses.lock().unwrap().get(&tool_id).cloned();
            Ok(response.unwrap_or_else(|| json!({ "tool": tool_id, "args": args, "call": call })))
        })
    }
}

/// Code executor that records `(tool_name, code, args)` and echoes the args back.
#[derive(Default)]
pub struct RecordingCode {
    calls: Mutex<Vec<(String, String, Value)>>,
    failure: Mutex<Option<String>>,
}

impl RecordingCode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.into());
    }

    pub fn calls(&self) -> Vec<(String, String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

impl CodeExecutor for RecordingCode {
    fn execute(&self, tool_name: &str, code: &str, args: Value) -> BoxFuture<'_, Result<Value>> {
        let tool_name = tool_name.to_string();
        let code = code.to_string();
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push((tool_name.clone(), code, args.clone()));
            if let Some(message) = self.failure.lock().unwrap().clone() {
                return Err(GraphError::CodeExecution(message));
            }
            Ok(json!({ "tool": tool_name, "params": args }))
        })
    }
}

// ── Retrieval / transform ───────────────────────────────────────

/// Retrieval service returning a fixed context string.
pub struct StaticRetrieval {
    context: Mutex<String>,
    queries: Mutex<Vec<RetrievalQuery>>,
}

impl StaticRetrieval {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: Mutex::new(context.into()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<RetrievalQuery> {
        self.queries.lock().unwrap().clone()
    }
}

impl Default for StaticRetrieval {
    fn default() -> Self {
        Self::new("retrieved context")
    }
}

impl RetrievalService for StaticRetrieval {
    fn query(&self, query: RetrievalQuery) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            self.queries.lock().unwrap().push(query);
            Ok(self.context.lock().unwrap().clone())
        })
    }
}

/// Transform service that records requests.
///
/// Returns the configured value, or `{ userRequest, sources }` with the
/// number of sources.
#[derive(Default)]
pub struct EchoTransform {
    response: Mutex<Option<Value>>,
    requests: Mutex<Vec<TransformRequest>>,
}

impl EchoTransform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, value: Value) {
        *self.response.lock().unwrap() = Some(value);
    }

    pub fn requests(&self) -> Vec<TransformRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl TransformService for EchoTransform {
    fn transform(&self, request: TransformRequest) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let echo = json!({
                "userRequest": request.user_request,
                "sources": request.sources.len(),
            });
            self.requests.lock().unwrap().push(request);
            let configured = self.response.lock().unwrap().clone();
            Ok(configured.unwrap_or(echo))
        })
    }
}

// ── Token / log ─────────────────────────────────────────────────

/// Token provider handing out a fixed token and counting requests.
pub struct StaticToken {
    token: String,
    issued: Mutex<usize>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            issued: Mutex::new(0),
        }
    }

    pub fn issued(&self) -> usize {
        *self.issued.lock().unwrap()
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            *self.issued.lock().unwrap() += 1;
            Ok(self.token.clone())
        })
    }
}

/// Log sink collecting entries in memory.
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl LogSink for MemorySink {
    fn append(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

// ── Bundles and fixtures ────────────────────────────────────────

/// One of every mock, kept around so tests can inspect them after a run.
pub struct Mocks {
    pub model: Arc<ScriptedModel>,
    pub tools: Arc<RecordingTools>,
    pub code: Arc<RecordingCode>,
    pub retrieval: Arc<StaticRetrieval>,
    pub transform: Arc<EchoTransform>,
}

impl Mocks {
    pub fn new() -> Self {
        Self {
            model: Arc::new(ScriptedModel::new()),
            tools: Arc::new(RecordingTools::new()),
            code: Arc::new(RecordingCode::new()),
            retrieval: Arc::new(StaticRetrieval::default()),
            transform: Arc::new(EchoTransform::new()),
        }
    }

    pub fn collaborators(&self, evaluator: Arc<dyn ExpressionEvaluator>) -> Collaborators {
        Collaborators {
            evaluator,
            model: self.model.clone(),
            tools: self.tools.clone(),
            code: Some(self.code.clone()),
            retrieval: self.retrieval.clone(),
            transform: self.transform.clone(),
        }
    }
}

impl Default for Mocks {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a graph, panicking on validation errors.
pub fn graph(nodes: Vec<Node>, edges: Vec<Edge>) -> Graph {
    Graph::new(nodes, edges).expect("test graph must be valid")
}

pub fn start_node() -> Node {
    Node::new("start", NodeKind::Start, "Start")
}

/// `tool` node calling the built-in tool `tool_id`.
pub fn built_in_tool(id: &str, label: &str, tool_id: &str) -> Node {
    Node::new(id, NodeKind::Tool, label).with_payload(json!({
        "type": "built-in",
        "tool": { "id": tool_id, "name": tool_id }
    }))
}

/// `end` node returning its resolved inputs as JSON.
pub fn json_end(id: &str) -> Node {
    Node::new(id, NodeKind::End, "End").with_payload(json!({ "output_type": "JSON" }))
}

/// `state` node applying `updates` (the `stateUpdates` array).
pub fn state_node(id: &str, label: &str, updates: Value) -> Node {
    Node::new(id, NodeKind::State, label).with_payload(json!({ "stateUpdates": updates }))
}

pub fn loop_node(id: &str, label: &str, payload: Value) -> Node {
    Node::new(id, NodeKind::Loop, label).with_payload(payload)
}

/// Edge from `loop_id`'s start handle into its body.
pub fn loop_entry(loop_id: &str, target: &str) -> Edge {
    Edge::new(loop_id, target).from_handle(format!("{}-loop-start", loop_id))
}

/// Edge closing a loop body back into `loop_id`'s end handle.
pub fn loop_back(source: &str, loop_id: &str) -> Edge {
    Edge::new(source, loop_id).to_handle(format!("{}-loop-end", loop_id))
}

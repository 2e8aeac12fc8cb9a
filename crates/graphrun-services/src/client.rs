//! HTTP client for the remote workflow services.
//!
//! One [`ServiceClient`] implements the model, built-in tool, retrieval and
//! auto-transform collaborators against a single base URL, and reads stored
//! workflows from the same service. Every request carries a bearer token from
//! the configured [`TokenProvider`].

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use reqwest::Method;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use graphrun_core::config::ServiceConfig;
use graphrun_core::error::{GraphError, Result};
use graphrun_core::graph::{Graph, GraphDocument};
use graphrun_core::traits::{ModelService, RetrievalService, TokenProvider, ToolInvoker, TransformService};
use graphrun_core::types::*;

use crate::events::{ChatAccumulator, StreamEvent};
use crate::retry::{HttpFailure, RetryPolicy};
use crate::sse::SseStream;

pub struct ServiceClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
    retry: RetryPolicy,
}

/// Wire body of a completion request.
#[derive(Serialize)]
struct CompletionBody<'a> {
    #[serde(flatten)]
    request: &'a ChatRequest,
    stream: bool,
    never_use_history: bool,
    files: [Value; 0],
}

impl ServiceClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(config: &ServiceConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        Self::new(&config.base_url, tokens).with_retry(RetryPolicy::new(config.retry.clone()))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request and return the response, retrying transient failures.
    /// `body` is sent as JSON when present.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<std::result::Result<reqwest::Response, HttpFailure>> {
        let url = self.url(path);
        let mut attempt = 0;
        loop {
            let token = self.tokens.token().await?;
            let mut request = self.http.request(method.clone(), &url).bearer_auth(token);
            if let Some(body) = body {
                request = request.json(body);
            }
            let result = request.send().await.map_err(HttpFailure::from);

            let failure = match result {
                Ok(response) if response.status().is_success() => return Ok(Ok(response)),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let text = response.text().await.unwrap_or_default();
                    HttpFailure::status(status, error_message(&text))
                }
                Err(failure) => failure,
            };

            if !self.retry.should_retry(&failure, attempt) {
                return Ok(Err(failure));
            }
            let backoff = self.retry.backoff(attempt);
            warn!(
                url = %url,
                attempt = attempt + 1,
                max_retries = self.retry.max_retries(),
                backoff_ms = backoff.as_millis() as u64,
                error = %failure,
                "Retrying service request"
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    /// POST `body` and decode the JSON response. `fail` maps a transport or
    /// status failure onto the caller's error variant.
    async fn post_json(
        &self,
        path: &str,
        body: &impl Serialize,
        fail: impl Fn(String) -> GraphError,
    ) -> Result<Value> {
        let response = self
            .send(Method::POST, path, Some(body))
            .await?
            .map_err(|f| fail(f.to_string()))?;
        response
            .json::<Value>()
            .await
            .map_err(|e| fail(format!("invalid response body: {}", e)))
    }

    async fn get_json(&self, path: &str, fail: impl Fn(String) -> GraphError) -> Result<Value> {
        let response = self
            .send(Method::GET, path, None::<&()>)
            .await?
            .map_err(|f| fail(f.to_string()))?;
        response
            .json::<Value>()
            .await
            .map_err(|e| fail(format!("invalid response body: {}", e)))
    }

    /// Production workflows visible to the caller, paginated by `limit` and `offset`.
    pub async fn list_workflows(
        &self,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<WorkflowList> {
        let body = self
            .get_json(&list_path(limit, offset), GraphError::Workflow)
            .await?;
        workflow_list(body)
    }

    /// The current version of a stored workflow, validated as a [`Graph`].
    pub async fn fetch_workflow(&self, workflow_id: &str) -> Result<Graph> {
        let path = format!("/ai-workflow/{}/version/current", workflow_id);
        let body = self.get_json(&path, GraphError::Workflow).await?;
        let graph = workflow_graph(workflow_id, body)?;
        debug!(
            workflow_id,
            nodes = graph.nodes().len(),
            edges = graph.edges().len(),
            "Fetched workflow"
        );
        Ok(graph)
    }
}

fn list_path(limit: Option<u32>, offset: Option<u32>) -> String {
    let mut path = "/ai-workflow/list?status=PRODUCTION".to_string();
    if let Some(limit) = limit {
        path.push_str(&format!("&limit={}", limit));
    }
    if let Some(offset) = offset {
        path.push_str(&format!("&offset={}", offset));
    }
    path
}

fn workflow_list(body: Value) -> Result<WorkflowList> {
    let data = body.get("data").cloned().unwrap_or(Value::Null);
    if data.is_null() {
        return Err(GraphError::Workflow("list response has no data".into()));
    }
    serde_json::from_value(data)
        .map_err(|e| GraphError::Workflow(format!("invalid workflow list: {}", e)))
}

/// Graph document at `data.workflow_data`.
fn workflow_graph(workflow_id: &str, mut body: Value) -> Result<Graph> {
    let document = body
        .pointer_mut("/data/workflow_data")
        .map(Value::take)
        .filter(|d| !d.is_null())
        .ok_or_else(|| {
            GraphError::Workflow(format!("workflow {} has no workflow_data", workflow_id))
        })?;
    let document: GraphDocument = serde_json::from_value(document).map_err(|e| {
        GraphError::Workflow(format!("workflow {} is not a graph document: {}", workflow_id, e))
    })?;
    Graph::from_document(document)
}

/// `message` or `error` field of a JSON error body, else the raw text.
fn error_message(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| text.trim().to_string())
}

/// Result of a built-in tool call: `output`, or `data.output`.
fn tool_output(tool_id: &str, body: Value) -> Result<Value> {
    if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
        let message = error
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| error.to_string());
        return Err(GraphError::ToolExecution {
            tool: tool_id.to_string(),
            message,
        });
    }
    Ok(body
        .get("output")
        .or_else(|| body.pointer("/data/output"))
        .cloned()
        .unwrap_or(Value::Null))
}

/// Context text of a retrieval response: `data.context`, or `context`.
fn retrieval_context(body: &Value) -> String {
    body.pointer("/data/context")
        .or_else(|| body.get("context"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn transform_result(body: Value) -> Result<Value> {
    body.pointer("/data/result")
        .cloned()
        .ok_or_else(|| GraphError::Transform("response has no data.result".into()))
}

impl ModelService for ServiceClient {
    fn complete_chat(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatResponse>> {
        Box::pin(async move {
            let body = CompletionBody {
                request: &request,
                stream: true,
                never_use_history: true,
                files: [],
            };
            debug!(
                session_id = %request.session_id,
                messages = request.messages.len(),
                continuation = request.checkpoint_id.is_some(),
                "Requesting completion"
            );

            let response = self
                .send(Method::POST, "/llm-completion", Some(&body))
                .await?
                .map_err(|f| GraphError::ModelService(f.to_string()))?;

            let mut events = SseStream::new(response.bytes_stream());
            let mut acc = ChatAccumulator::new();
            while let Some(payload) = events.next().await {
                let Some(event) = StreamEvent::parse(&payload?) else {
                    continue;
                };
                if let Some(result) = acc.push(event) {
                    return result;
                }
            }
            Ok(acc.finish())
        })
    }
}

impl ToolInvoker for ServiceClient {
    fn invoke_built_in(&self, tool_id: &str, args: Value) -> BoxFuture<'_, Result<Value>> {
        let tool_id = tool_id.to_string();
        Box::pin(async move {
            let path = format!("/built-in-tool-node/{}/invoke", tool_id);
            let body = self
                .post_json(&path, &json!({ "args": args }), |message| {
                    GraphError::ToolExecution {
                        tool: tool_id.clone(),
                        message,
                    }
                })
                .await?;
            tool_output(&tool_id, body)
        })
    }
}

impl RetrievalService for ServiceClient {
    fn query(&self, query: RetrievalQuery) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let path = format!("/ai-workflow/rag-storage-node/{}/query", query.storage_id);
            let body = self.post_json(&path, &query, GraphError::Retrieval).await?;
            Ok(retrieval_context(&body))
        })
    }
}

impl TransformService for ServiceClient {
    fn transform(&self, request: TransformRequest) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let body = self
                .post_json(
                    "/ai-workflow/helper-node/auto-transformer",
                    &request,
                    GraphError::Transform,
                )
                .await?;
            transform_result(body)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphrun_test_utils::StaticToken;

    #[test]
    fn test_completion_body_shape() {
        let request = ChatRequest {
            session_id: "run-1".into(),
            model_node: json!({ "model": "gpt" }),
            messages: vec![ChatMessage::user("hi")],
            checkpoint_id: None,
        };
        let body = CompletionBody {
            request: &request,
            stream: true,
            never_use_history: true,
            files: [],
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["session_id"], "run-1");
        assert_eq!(v["chat_model_node"]["model"], "gpt");
        assert_eq!(v["messages"][0]["role"], "user");
        assert_eq!(v["stream"], true);
        assert!(v["checkpoint_id"].is_null());
        assert_eq!(v["files"], json!([]));
    }

    #[test]
    fn test_tool_output_shapes() {
        assert_eq!(tool_output("t", json!({ "output": 1 })).unwrap(), json!(1));
        assert_eq!(
            tool_output("t", json!({ "data": { "output": "x" } })).unwrap(),
            json!("x")
        );
        assert_eq!(tool_output("t", json!({})).unwrap(), Value::Null);
        let err = tool_output("t", json!({ "error": "bad args", "output": 1 })).unwrap_err();
        assert!(matches!(err, GraphError::ToolExecution { message, .. } if message == "bad args"));
    }

    #[test]
    fn test_retrieval_context_shapes() {
        assert_eq!(retrieval_context(&json!({ "data": { "context": "a" } })), "a");
        assert_eq!(retrieval_context(&json!({ "context": "b" })), "b");
        assert_eq!(retrieval_context(&json!({ "data": {} })), "");
    }

    #[test]
    fn test_transform_result_required() {
        assert_eq!(
            transform_result(json!({ "data": { "result": { "k": 1 } } })).unwrap(),
            json!({ "k": 1 })
        );
        assert!(matches!(
            transform_result(json!({ "data": {} })),
            Err(GraphError::Transform(_))
        ));
    }

    #[test]
    fn test_error_message_prefers_json_fields() {
        assert_eq!(error_message(r#"{"message":"denied"}"#), "denied");
        assert_eq!(error_message(r#"{"error":"nope"}"#), "nope");
        assert_eq!(error_message(" plain text \n"), "plain text");
    }

    #[test]
    fn test_list_path() {
        assert_eq!(list_path(None, None), "/ai-workflow/list?status=PRODUCTION");
        assert_eq!(
            list_path(Some(10), Some(20)),
            "/ai-workflow/list?status=PRODUCTION&limit=10&offset=20"
        );
    }

    #[test]
    fn test_workflow_graph_requires_document() {
        let err = workflow_graph("wf-1", json!({ "data": {} })).unwrap_err();
        assert!(matches!(err, GraphError::Workflow(m) if m.contains("wf-1")));

        let err = workflow_graph("wf-1", json!({ "data": { "workflow_data": { "edges": [] } } }))
            .unwrap_err();
        assert!(matches!(err, GraphError::Workflow(_)));
    }

    /// Serve one canned JSON response on a local port and return the raw request.
    async fn serve_once(body: Value) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let body = body.to_string();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{}", addr), handle)
    }

    #[tokio::test]
    async fn test_list_workflows() {
        let (base, server) = serve_once(json!({
            "success": true,
            "data": {
                "workflows": [{ "id": "v7", "workflow_id": "wf-1", "version": 7, "name": "Triage" }],
                "total": 1
            }
        }))
        .await;
        let client = ServiceClient::new(base, Arc::new(StaticToken::new("t")))
            .with_retry(RetryPolicy::none());

        let list = client.list_workflows(Some(10), None).await.unwrap();
        assert_eq!(list.total, 1);
        assert_eq!(list.workflows[0].workflow_id, "wf-1");

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /ai-workflow/list?status=PRODUCTION&limit=10 HTTP/1.1"));
        assert!(request.to_lowercase().contains("authorization: bearer t"));
    }

    #[tokio::test]
    async fn test_fetch_workflow_builds_graph() {
        let (base, server) = serve_once(json!({
            "success": true,
            "data": {
                "workflow_id": "wf-1",
                "workflow_data": {
                    "nodes": [
                        { "id": "s", "type": "start", "data": { "label": "Start" } },
                        { "id": "e", "type": "end", "data": { "label": "End" } }
                    ],
                    "edges": [{ "id": "s-e", "source": "s", "target": "e" }],
                    "viewport": { "x": 0, "y": 0, "zoom": 1 }
                }
            }
        }))
        .await;
        let client = ServiceClient::new(base, Arc::new(StaticToken::new("t")))
            .with_retry(RetryPolicy::none());

        let graph = client.fetch_workflow("wf-1").await.unwrap();
        assert_eq!(graph.nodes().len(), 2);
        assert_eq!(graph.start_node().id, "s");

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /ai-workflow/wf-1/version/current HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_connection_failure_maps_to_collaborator_error() {
        let tokens = Arc::new(StaticToken::new("t"));
        let client =
            ServiceClient::new("http://127.0.0.1:9/", tokens.clone()).with_retry(RetryPolicy::none());
        assert_eq!(client.base_url(), "http://127.0.0.1:9");

        let err = client
            .query(RetrievalQuery {
                storage_id: "kb".into(),
                query: "q".into(),
                top_k: 5,
                search_type: "similarity".into(),
                file_names: vec![],
                mmr_lambda: None,
                filter_metadata: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Retrieval(_)));
        assert_eq!(tokens.issued(), 1);
    }
}

use serde::{Deserialize, Serialize};

// ── Model service ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            name: None,
            tool_call_id: None,
        }
    }

    pub fn tool_result(
        name: impl Into<String>,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            name: Some(name.into()),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// One completion request issued by an `llm` node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub session_id: String,
    /// The node's payload (model selection, prompts, output type).
    #[serde(rename = "chat_model_node")]
    pub model_node: serde_json::Value,
    pub messages: Vec<ChatMessage>,
    /// Set on continuation calls that carry tool results.
    pub checkpoint_id: Option<String>,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(rename = "tool_call_id", default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatResponse {
    /// The model finished. `parsed` is set when structured output was requested.
    Final {
        message: Option<String>,
        parsed: Option<serde_json::Value>,
    },
    /// The model wants tool results before it can answer.
    ToolCalls {
        calls: Vec<ToolCall>,
        checkpoint_id: Option<String>,
    },
}

// ── Retrieval ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalQuery {
    #[serde(skip)]
    pub storage_id: String,
    pub query: String,
    pub top_k: u32,
    pub search_type: String,
    #[serde(rename = "fileNames", skip_serializing_if = "Vec::is_empty")]
    pub file_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mmr_lambda: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_metadata: Option<serde_json::Value>,
}

// ── Auto-transform ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeDescriptor {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformSource {
    pub source_output: serde_json::Value,
    pub source_node: NodeDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformRequest {
    pub user_request: String,
    pub sources: Vec<TransformSource>,
    pub target_node: NodeDescriptor,
    pub target_input_type: serde_json::Value,
}

// ── Stored workflows ────────────────────────────────────────────

/// One entry of the workflow listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: String,
    pub workflow_id: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub is_production: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowList {
    #[serde(default)]
    pub workflows: Vec<WorkflowSummary>,
    #[serde(default)]
    pub total: u64,
}

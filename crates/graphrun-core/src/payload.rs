//! Typed views over the `nodeData` payload of each node kind.

use serde::{Deserialize, Serialize};

/// Whether a node produces free text or a structured object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutputType {
    #[default]
    Text,
    Json,
}

// ── Tool ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolKind {
    Custom,
    BuiltIn,
    Mcp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub function_body: Option<String>,
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,
}

impl ToolSpec {
    /// Name shown to the sandbox and in logs.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPayload {
    #[serde(rename = "type")]
    pub kind: ToolKind,
    #[serde(default)]
    pub tool: ToolSpec,
}

// ── LLM ─────────────────────────────────────────────────────────

/// A tool the model may call during an `llm` node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmToolSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ToolKind,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "functionCode")]
    pub function_code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmPayload {
    #[serde(default)]
    pub output_type: OutputType,
    #[serde(default)]
    pub tools: Vec<LlmToolSpec>,
}

// ── Transformer ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerPayload {
    #[serde(rename = "userRequest")]
    pub user_request: String,
}

// ── End ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndPayload {
    #[serde(default)]
    pub output_type: OutputType,
    #[serde(default)]
    pub output_schema: Option<serde_json::Value>,
}

// ── RAG ─────────────────────────────────────────────────────────

pub const DEFAULT_TOP_K: u32 = 5;
pub const DEFAULT_SEARCH_TYPE: &str = "similarity";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagPayload {
    #[serde(default)]
    pub storage_id: Option<String>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub search_type: Option<String>,
    #[serde(default, rename = "fileNames")]
    pub file_names: Vec<String>,
    #[serde(default)]
    pub mmr_lambda: Option<f64>,
    #[serde(default)]
    pub filter_metadata: Option<serde_json::Value>,
}

// ── Condition ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionBranch {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(rename = "outputHandleId")]
    pub output_handle_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionPayload {
    #[serde(default)]
    pub conditions: Vec<ConditionBranch>,
    #[serde(default, rename = "defaultOutputHandleId")]
    pub default_output_handle_id: Option<String>,
}

impl ConditionPayload {
    pub fn default_handle(&self, node_id: &str) -> String {
        self.default_output_handle_id
            .clone()
            .unwrap_or_else(|| format!("{}-output-default", node_id))
    }
}

// ── State ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateUpdate {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub binding: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatePayload {
    #[serde(default, rename = "stateUpdates")]
    pub state_updates: Vec<StateUpdate>,
}

// ── Loop ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExitCondition {
    #[serde(default)]
    pub expression: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopPayload {
    #[serde(default)]
    pub exit_condition: Option<ExitCondition>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub loop_start_handle_id: Option<String>,
    #[serde(default)]
    pub loop_end_handle_id: Option<String>,
}

impl LoopPayload {
    pub fn start_handle(&self, node_id: &str) -> String {
        self.loop_start_handle_id
            .clone()
            .unwrap_or_else(|| format!("{}-loop-start", node_id))
    }

    pub fn end_handle(&self, node_id: &str) -> String {
        self.loop_end_handle_id
            .clone()
            .unwrap_or_else(|| format!("{}-loop-end", node_id))
    }

    /// Exit expression, if one is set and non-blank.
    pub fn exit_expression(&self) -> Option<&str> {
        self.exit_condition
            .as_ref()
            .and_then(|c| c.expression.as_deref())
            .filter(|e| !e.trim().is_empty())
    }
}

/// Why a loop stopped iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoopOutcome {
    Exit,
    MaxReached,
}

impl LoopOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopOutcome::Exit => "exit",
            LoopOutcome::MaxReached => "max-reached",
        }
    }

    /// Output handle of the loop node for this outcome.
    pub fn handle(&self, node_id: &str) -> String {
        format!("{}-{}", node_id, self.as_str())
    }
}

// ── Upload ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadPayload {
    #[serde(default, rename = "uploadedFile")]
    pub uploaded_file: Option<serde_json::Value>,
}

use thiserror::Error;

use crate::graph::NodeKind;

#[derive(Debug, Error)]
pub enum GraphError {
    // Graph validation errors
    #[error("Graph has no start node")]
    NoStartNode,

    #[error("Graph has {0} start nodes, expected exactly one")]
    MultipleStartNodes(usize),

    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("Edge {edge} references unknown node {node}")]
    DanglingEdge { edge: String, node: String },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    // Executor errors
    #[error("Node kind not supported: {0}")]
    UnsupportedNodeKind(NodeKind),

    #[error("Invalid payload on node {node_id}: {message}")]
    InvalidPayload { node_id: String, message: String },

    #[error("Node {node_id} ({kind}) failed: {source}")]
    NodeFailed {
        node_id: String,
        kind: NodeKind,
        #[source]
        source: Box<GraphError>,
    },

    // Loop errors
    #[error("Loop {loop_id} revisited node {node_id} within one pass")]
    LoopCycle { loop_id: String, node_id: String },

    #[error("Loop {loop_id} body is not connected to its end handle at node {node_id}")]
    LoopDeadEnd { loop_id: String, node_id: String },

    // Collaborator errors
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Model service request failed: {0}")]
    ModelService(String),

    #[error("Model service returned an error: {0}")]
    ModelResponse(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool type not supported: {0}")]
    UnsupportedTool(String),

    #[error("Code execution failed: {0}")]
    CodeExecution(String),

    #[error("Code execution timed out after {0}s")]
    CodeTimeout(u64),

    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error("Auto-transform failed: {0}")]
    Transform(String),

    #[error("Workflow service error: {0}")]
    Workflow(String),

    #[error("Expression evaluation failed: {0}")]
    Evaluation(#[from] EvalError),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GraphError {
    /// Wrap an executor error with the node that produced it.
    pub fn in_node(self, node_id: impl Into<String>, kind: NodeKind) -> Self {
        GraphError::NodeFailed {
            node_id: node_id.into(),
            kind,
            source: Box::new(self),
        }
    }

    pub fn invalid_payload(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        GraphError::InvalidPayload {
            node_id: node_id.into(),
            message: message.into(),
        }
    }
}

/// Failure of a single expression evaluation. Always recoverable by the caller.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    #[error("expression is empty")]
    Empty,

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("undefined identifier in `{0}`")]
    Undefined(String),

    #[error("evaluation error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;

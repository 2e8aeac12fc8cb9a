//! Immutable graph model for one run.
//!
//! The document layout follows the visual editor the graphs are authored in:
//! nodes carry `type` plus a `data` block with the label, optional input
//! bindings and a kind-specific `nodeData` payload. Layout fields such as
//! `position` are accepted and ignored.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

/// Closed set of node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Start,
    Tool,
    Llm,
    Transformer,
    End,
    Rag,
    Condition,
    State,
    Loop,
    Upload,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::Tool => "tool",
            NodeKind::Llm => "llm",
            NodeKind::Transformer => "transformer",
            NodeKind::End => "end",
            NodeKind::Rag => "rag",
            NodeKind::Condition => "condition",
            NodeKind::State => "state",
            NodeKind::Loop => "loop",
            NodeKind::Upload => "upload",
        }
    }

    /// Kinds whose output carries a `selectedHandleId` that picks one outgoing edge.
    pub fn is_branching(&self) -> bool {
        matches!(self, NodeKind::Condition | NodeKind::Loop)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label, bindings and payload of a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeData {
    /// Identifier of this node's output inside expression contexts.
    #[serde(default)]
    pub label: String,
    /// Dotted target path -> expression.
    #[serde(
        default,
        rename = "inputBindings",
        skip_serializing_if = "Option::is_none"
    )]
    pub input_bindings: Option<BTreeMap<String, String>>,
    /// Kind-specific payload, decoded by the executor for that kind.
    #[serde(default, rename = "nodeData", skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub data: NodeData,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            data: NodeData {
                label: label.into(),
                input_bindings: None,
                payload: None,
            },
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.data.payload = Some(payload);
        self
    }

    pub fn with_binding(mut self, target: impl Into<String>, expr: impl Into<String>) -> Self {
        self.data
            .input_bindings
            .get_or_insert_with(BTreeMap::new)
            .insert(target.into(), expr.into());
        self
    }

    pub fn label(&self) -> &str {
        &self.data.label
    }

    /// True when the node declares at least one input binding.
    pub fn has_bindings(&self) -> bool {
        self.data
            .input_bindings
            .as_ref()
            .is_some_and(|b| !b.is_empty())
    }

    /// Decode the payload into a typed structure.
    ///
    /// A missing payload decodes from `{}`, so payload types with all-default
    /// fields always succeed; required fields surface as `InvalidPayload`.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let raw = self
            .data
            .payload
            .clone()
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
        serde_json::from_value(raw)
            .map_err(|e| GraphError::invalid_payload(&self.id, e.to_string()))
    }

    /// Like [`Node::payload`] but fails when the node has no payload at all.
    pub fn required_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        match &self.data.payload {
            Some(v) if !v.is_null() => self.payload(),
            _ => Err(GraphError::invalid_payload(&self.id, "node payload is missing")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(default)]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
        }
    }

    pub fn from_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }

    pub fn to_handle(mut self, handle: impl Into<String>) -> Self {
        self.target_handle = Some(handle.into());
        self
    }

    fn display_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("{}->{}", self.source, self.target))
    }
}

/// Serialized form of a graph as exchanged with the editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDocument {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Editor viewport; carried through, never read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<serde_json::Value>,
}

/// Start node parameters as advertised to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartParams {
    pub schema: Option<serde_json::Value>,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A user-supplied tool embedded in a `tool` node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomToolInfo {
    pub tool_name: String,
    pub request_schema: Option<serde_json::Value>,
    pub response_schema: Option<serde_json::Value>,
    pub function_body: Option<String>,
}

/// Validated graph with id and adjacency indexes.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    index: HashMap<String, usize>,
    incoming: HashMap<String, Vec<usize>>,
    outgoing: HashMap<String, Vec<usize>>,
    start: usize,
}

impl Graph {
    /// Build a graph, enforcing unique ids, resolvable edges and a single start node.
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(GraphError::DuplicateNodeId(node.id.clone()));
            }
        }

        let mut incoming: HashMap<String, Vec<usize>> = HashMap::new();
        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, edge) in edges.iter().enumerate() {
            for endpoint in [&edge.source, &edge.target] {
                if !index.contains_key(endpoint) {
                    return Err(GraphError::DanglingEdge {
                        edge: edge.display_id(),
                        node: endpoint.clone(),
                    });
                }
            }
            outgoing.entry(edge.source.clone()).or_default().push(i);
            incoming.entry(edge.target.clone()).or_default().push(i);
        }

        let starts: Vec<usize> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.kind == NodeKind::Start)
            .map(|(i, _)| i)
            .collect();
        let start = match starts.as_slice() {
            [] => return Err(GraphError::NoStartNode),
            [only] => *only,
            many => return Err(GraphError::MultipleStartNodes(many.len())),
        };

        Ok(Self {
            nodes,
            edges,
            index,
            incoming,
            outgoing,
            start,
        })
    }

    pub fn from_document(doc: GraphDocument) -> Result<Self> {
        Self::new(doc.nodes, doc.edges)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let doc: GraphDocument = serde_json::from_str(json)?;
        Self::from_document(doc)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn start_node(&self) -> &Node {
        &self.nodes[self.start]
    }

    /// Edges targeting `id`, in document order.
    pub fn incoming<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.incoming
            .get(id)
            .into_iter()
            .flatten()
            .map(move |&i| &self.edges[i])
    }

    /// Edges leaving `id`, in document order.
    pub fn outgoing<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.outgoing
            .get(id)
            .into_iter()
            .flatten()
            .map(move |&i| &self.edges[i])
    }

    /// The outgoing edge of `id` leaving through `handle`, if any.
    pub fn outgoing_by_handle(&self, id: &str, handle: &str) -> Option<&Edge> {
        self.outgoing(id)
            .find(|e| e.source_handle.as_deref() == Some(handle))
    }

    /// Distinct targets of `id`'s outgoing edges, in edge order.
    pub fn successors(&self, id: &str) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.outgoing(id)
            .map(|e| e.target.as_str())
            .filter(|t| seen.insert(*t))
            .collect()
    }

    pub fn start_params(&self) -> StartParams {
        let payload = self.start_node().data.payload.as_ref();
        StartParams {
            schema: payload
                .and_then(|p| p.get("schema"))
                .filter(|s| !s.is_null())
                .cloned(),
            kind: payload
                .and_then(|p| p.get("type"))
                .and_then(|t| t.as_str())
                .unwrap_or("unknown")
                .to_string(),
        }
    }

    pub fn custom_tools(&self) -> Vec<CustomToolInfo> {
        self.nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Tool)
            .filter_map(|n| n.data.payload.as_ref())
            .filter(|p| p.get("type").and_then(|t| t.as_str()) == Some("custom"))
            .filter_map(|p| p.get("tool"))
            .map(|tool| CustomToolInfo {
                tool_name: tool
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Unknown")
                    .to_string(),
                request_schema: tool.get("schema").filter(|v| !v.is_null()).cloned(),
                response_schema: tool
                    .get("response_schema")
                    .filter(|v| !v.is_null())
                    .cloned(),
                function_body: tool
                    .get("function_body")
                    .and_then(|v| v.as_str())
                    .map(String::from),
            })
            .collect()
    }
}

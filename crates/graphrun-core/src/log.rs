use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::NodeKind;

/// Phase of a node's execution that a log entry reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogPhase {
    Start,
    Complete,
    Error,
    Info,
    Warning,
}

impl fmt::Display for LogPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogPhase::Start => "start",
            LogPhase::Complete => "complete",
            LogPhase::Error => "error",
            LogPhase::Info => "info",
            LogPhase::Warning => "warning",
        };
        f.write_str(s)
    }
}

/// One entry of a run's execution trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub node_id: String,
    pub node_kind: NodeKind,
    pub phase: LogPhase,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(
        node_id: impl Into<String>,
        node_kind: NodeKind,
        phase: LogPhase,
        message: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            node_kind,
            phase,
            message: message.into(),
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Entry without its timestamp, for comparing the shape of two runs.
    pub fn structure(&self) -> (String, NodeKind, LogPhase, String) {
        (
            self.node_id.clone(),
            self.node_kind,
            self.phase,
            self.message.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serialization() {
        let entry = LogEntry::new("n1", NodeKind::Tool, LogPhase::Complete, "done");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"phase\":\"complete\""));
        assert!(json.contains("\"node_kind\":\"tool\""));
        // data is None and skipped
        assert!(!json.contains("data"));
    }

    #[test]
    fn test_structure_ignores_timestamp() {
        let a = LogEntry::new("n1", NodeKind::Start, LogPhase::Start, "x");
        let mut b = a.clone();
        b.timestamp = b.timestamp + chrono::Duration::seconds(5);
        assert_ne!(a, b);
        assert_eq!(a.structure(), b.structure());
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use graphrun_core::config::EngineConfig;
use graphrun_core::error::{GraphError, Result};
use graphrun_core::graph::{Graph, Node};
use graphrun_core::log::{LogEntry, LogPhase};
use graphrun_core::traits::{CodeExecutor, Collaborators, ExpressionEvaluator, LogSink};

/// Mutable state of one graph run.
///
/// Shared by reference between every in-flight node execution. Outputs and
/// state sit behind `RwLock`s since many branches read while distinct nodes
/// write; the log is append-only.
pub struct RunContext {
    run_id: String,
    settings: EngineConfig,
    collaborators: Collaborators,
    sink: Option<Arc<dyn LogSink>>,
    outputs: RwLock<HashMap<String, Value>>,
    state: RwLock<Map<String, Value>>,
    log: Mutex<Vec<LogEntry>>,
}

impl RunContext {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            settings: EngineConfig::default(),
            collaborators,
            sink: None,
            outputs: RwLock::new(HashMap::new()),
            state: RwLock::new(Map::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_settings(mut self, settings: EngineConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn settings(&self) -> &EngineConfig {
        &self.settings
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn evaluator(&self) -> &dyn ExpressionEvaluator {
        self.collaborators.evaluator.as_ref()
    }

    pub fn code_executor(&self) -> Result<&dyn CodeExecutor> {
        self.collaborators
            .code
            .as_deref()
            .ok_or_else(|| GraphError::UnsupportedTool("custom (no code executor configured)".into()))
    }

    /// Clear outputs, state and log before a new run.
    pub fn reset(&self) {
        self.outputs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    // ── Outputs ─────────────────────────────────────────────────

    pub fn set_output(&self, node_id: impl Into<String>, output: Value) {
        self.outputs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node_id.into(), output);
    }

    pub fn output(&self, node_id: &str) -> Option<Value> {
        self.outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node_id)
            .cloned()
    }

    pub fn outputs(&self) -> HashMap<String, Value> {
        self.outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ── Global state ────────────────────────────────────────────

    pub fn set_state(&self, key: impl Into<String>, value: Value) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
    }

    pub fn state(&self) -> Map<String, Value> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Expression context: every produced output under its node's label, plus `state`.
    ///
    /// Labels are inserted in graph order, so a later node shadows an earlier
    /// one with the same label.
    pub fn eval_context(&self, graph: &Graph) -> Map<String, Value> {
        let mut context = Map::new();
        {
            let outputs = self.outputs.read().unwrap_or_else(PoisonError::into_inner);
            for node in graph.nodes() {
                if let Some(output) = outputs.get(&node.id) {
                    context.insert(node.label().to_string(), output.clone());
                }
            }
        }
        context.insert("state".to_string(), Value::Object(self.state()));
        context
    }

    // ── Log ─────────────────────────────────────────────────────

    /// Append an entry, mirror it to tracing, and forward it to the sink.
    pub fn log(&self, entry: LogEntry) {
        match entry.phase {
            LogPhase::Error => {
                error!(node_id = %entry.node_id, kind = %entry.node_kind, "{}", entry.message)
            }
            LogPhase::Warning => {
                warn!(node_id = %entry.node_id, kind = %entry.node_kind, "{}", entry.message)
            }
            LogPhase::Info => {
                info!(node_id = %entry.node_id, kind = %entry.node_kind, "{}", entry.message)
            }
            LogPhase::Start | LogPhase::Complete => {
                debug!(node_id = %entry.node_id, kind = %entry.node_kind, phase = %entry.phase, "{}", entry.message)
            }
        }

        if let Some(sink) = &self.sink {
            sink.append(&entry);
        }
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    pub fn record(&self, node: &Node, phase: LogPhase, message: impl Into<String>) {
        self.log(LogEntry::new(&node.id, node.kind, phase, message));
    }

    pub fn record_with(&self, node: &Node, phase: LogPhase, message: impl Into<String>, data: Value) {
        self.log(LogEntry::new(&node.id, node.kind, phase, message).with_data(data));
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

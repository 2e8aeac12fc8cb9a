//! Graph scheduler.
//!
//! Walks the graph from the start node. Nodes with several predecessors sit
//! behind a [`JoinGate`] so they run exactly once, after the last predecessor
//! arrives. Condition and loop nodes continue through their selected handle
//! only; every other node fans out to all of its successors concurrently and
//! waits for them before returning.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use futures::future::{join_all, BoxFuture};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use graphrun_core::error::{GraphError, Result};
use graphrun_core::graph::{Graph, NodeKind};
use graphrun_core::log::{LogEntry, LogPhase};
use graphrun_core::payload::LoopPayload;

use crate::context::RunContext;
use crate::executor::{run_node, selected_handle, ExecutorRegistry, NodeEnv};
use crate::gate::{Arrival, BranchCounter, GateState, JoinGate};

/// What a finished run leaves behind.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Output of the `end` node, if one was reached.
    pub result: Option<Value>,
    pub outputs: HashMap<String, Value>,
    pub state: Map<String, Value>,
    pub log: Vec<LogEntry>,
    pub elapsed_ms: u64,
}

pub struct Scheduler {
    registry: Arc<ExecutorRegistry>,
}

impl Scheduler {
    /// Scheduler with an executor for every node kind.
    pub fn new() -> Self {
        Self::with_registry(Arc::new(ExecutorRegistry::with_defaults()))
    }

    pub fn with_registry(registry: Arc<ExecutorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// Run `graph` with `inputs` against a freshly reset `ctx`.
    ///
    /// On error the context keeps the partial outputs and log.
    pub async fn run(&self, graph: &Graph, ctx: &RunContext, inputs: Value) -> Result<RunOutcome> {
        let started = Instant::now();
        ctx.reset();

        let walk = Walk::new(graph, ctx, &self.registry, &inputs);
        let start = graph.start_node();
        info!(run_id = %ctx.run_id(), nodes = graph.nodes().len(), "Starting graph run");

        walk.visit(&start.id).await?;

        let result = walk.take_result();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            run_id = %ctx.run_id(),
            elapsed_ms,
            has_result = result.is_some(),
            "Graph run complete"
        );

        Ok(RunOutcome {
            result,
            outputs: ctx.outputs(),
            state: ctx.state(),
            log: ctx.entries(),
            elapsed_ms,
        })
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of distinct predecessors per node.
///
/// Edges entering a loop through its end handle close the loop body and are
/// not predecessors of the loop node.
pub fn required_predecessors(graph: &Graph) -> HashMap<&str, usize> {
    let mut sources: HashMap<&str, HashSet<&str>> = HashMap::new();
    for edge in graph.edges() {
        if is_loop_back_edge(graph, &edge.target, edge.target_handle.as_deref()) {
            continue;
        }
        sources
            .entry(edge.target.as_str())
            .or_default()
            .insert(edge.source.as_str());
    }
    sources
        .into_iter()
        .map(|(target, from)| (target, from.len()))
        .collect()
}

fn is_loop_back_edge(graph: &Graph, target: &str, handle: Option<&str>) -> bool {
    let (Some(node), Some(handle)) = (graph.node(target), handle) else {
        return false;
    };
    if node.kind != NodeKind::Loop {
        return false;
    }
    let end_handle = node
        .payload::<LoopPayload>()
        .map(|p| p.end_handle(&node.id))
        .unwrap_or_else(|_| format!("{}-loop-end", node.id));
    handle == end_handle
}

enum Step<'g> {
    /// This branch is finished.
    Done,
    /// The branch parked at a gate and already gave up its slot.
    Parked,
    /// Continue into these nodes.
    Follow(Vec<&'g str>),
}

/// State of one run's traversal.
struct Walk<'g> {
    graph: &'g Graph,
    ctx: &'g RunContext,
    registry: &'g ExecutorRegistry,
    inputs: &'g Value,
    gates: HashMap<&'g str, JoinGate>,
    visited: Mutex<HashSet<&'g str>>,
    branches: BranchCounter,
    result: Mutex<Option<Value>>,
}

impl<'g> Walk<'g> {
    fn new(
        graph: &'g Graph,
        ctx: &'g RunContext,
        registry: &'g ExecutorRegistry,
        inputs: &'g Value,
    ) -> Self {
        let gates = required_predecessors(graph)
            .into_iter()
            .filter(|(_, required)| *required > 1)
            .map(|(id, required)| (id, JoinGate::new(required)))
            .collect();

        Self {
            graph,
            ctx,
            registry,
            inputs,
            gates,
            visited: Mutex::new(HashSet::new()),
            branches: BranchCounter::new(),
            result: Mutex::new(None),
        }
    }

    fn env(&self) -> NodeEnv<'g> {
        NodeEnv {
            ctx: self.ctx,
            graph: self.graph,
            registry: self.registry,
            initial_inputs: self.inputs,
        }
    }

    fn take_result(&self) -> Option<Value> {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Schedule `node_id` from an arriving branch. The caller hands over its branch slot.
    fn visit<'s>(&'s self, node_id: &'g str) -> BoxFuture<'s, Result<()>> {
        Box::pin(async move {
            let step = match self.step(node_id).await {
                Ok(step) => step,
                Err(e) => {
                    self.retire();
                    return Err(e);
                }
            };

            match step {
                Step::Done => {
                    self.retire();
                    Ok(())
                }
                Step::Parked => Ok(()),
                Step::Follow(targets) if targets.is_empty() => {
                    self.retire();
                    Ok(())
                }
                Step::Follow(targets) => {
                    self.branches.fork(targets.len() - 1);
                    let results = join_all(targets.into_iter().map(|t| self.visit(t))).await;
                    // Siblings are never cancelled; the first error wins once all are back.
                    results.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
                }
            }
        })
    }

    async fn step(&self, node_id: &'g str) -> Result<Step<'g>> {
        if self.is_visited(node_id) {
            return Ok(Step::Done);
        }
        let graph = self.graph;
        let node = graph
            .node(node_id)
            .ok_or_else(|| GraphError::NodeNotFound(node_id.to_string()))?;

        if let Some(gate) = self.gates.get(node_id) {
            match gate.arrive() {
                Arrival::Wait(waiter) => {
                    debug!(
                        node_id,
                        arrived = gate.arrived(),
                        required = gate.required(),
                        "Branch parked at join"
                    );
                    self.retire();
                    if waiter.wait().await == GateState::Abandoned {
                        debug!(node_id, "Parked branch released from abandoned join");
                    }
                    return Ok(Step::Parked);
                }
                Arrival::Last => {
                    debug!(node_id, required = gate.required(), "Join complete");
                }
            }
        }

        if !self.mark_visited(node_id) {
            return Ok(Step::Done);
        }

        let output = run_node(self.env(), node).await?;

        if node.kind == NodeKind::End {
            *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Some(output);
            return Ok(Step::Done);
        }

        if node.kind.is_branching() {
            let handle = selected_handle(&output);
            return match handle.and_then(|h| graph.outgoing_by_handle(node_id, h)) {
                Some(edge) => Ok(Step::Follow(vec![edge.target.as_str()])),
                None => {
                    self.ctx.record(
                        node,
                        LogPhase::Warning,
                        format!(
                            "No edge for selected handle {}, branch stops here",
                            handle.unwrap_or("<none>")
                        ),
                    );
                    Ok(Step::Done)
                }
            };
        }

        Ok(Step::Follow(graph.successors(node_id)))
    }

    fn is_visited(&self, node_id: &str) -> bool {
        self.visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(node_id)
    }

    fn mark_visited(&self, node_id: &'g str) -> bool {
        self.visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node_id)
    }

    /// Give back one branch slot. When none are left, every still-pending
    /// join can no longer complete and is abandoned.
    fn retire(&self) {
        if self.branches.retire() {
            self.abandon_pending();
        }
    }

    fn abandon_pending(&self) {
        for (node_id, gate) in &self.gates {
            if gate.arrived() == 0 || !gate.abandon() {
                continue;
            }
            warn!(
                node_id,
                arrived = gate.arrived(),
                required = gate.required(),
                "Join abandoned, remaining predecessors can no longer arrive"
            );
            if let Some(node) = self.graph.node(node_id) {
                self.ctx.log(LogEntry::new(
                    &node.id,
                    node.kind,
                    LogPhase::Warning,
                    format!(
                        "Join abandoned: {} of {} predecessors arrived",
                        gate.arrived(),
                        gate.required()
                    ),
                ));
            }
        }
    }
}

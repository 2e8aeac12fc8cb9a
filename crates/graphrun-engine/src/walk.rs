//! One pass over a loop node's body.
//!
//! Starting from the node behind the loop-start handle, execute nodes one
//! at a time. The pass ends as soon as the node just run has any edge into the loop's
//! end handle, whatever it selected. Otherwise branching nodes (conditions,
//! nested loops) are followed through their selected handle and any other
//! node through its first outgoing edge.

use std::collections::HashSet;

use graphrun_core::error::{GraphError, Result};
use graphrun_core::graph::Node;

use crate::executor::{run_node, selected_handle, NodeEnv};

/// Run the body of `loop_node` once, beginning at `entry`.
///
/// Fails if a node is reached twice within the pass, or if the walk runs
/// out of edges before reaching the loop's end handle.
pub async fn walk_body(
    env: NodeEnv<'_>,
    loop_node: &Node,
    entry: &str,
    end_handle: &str,
) -> Result<()> {
    let graph = env.graph;
    let mut seen: HashSet<String> = HashSet::new();
    let mut current = entry.to_string();

    loop {
        if !seen.insert(current.clone()) {
            return Err(GraphError::LoopCycle {
                loop_id: loop_node.id.clone(),
                node_id: current,
            });
        }

        let node = graph
            .node(&current)
            .ok_or_else(|| GraphError::NodeNotFound(current.clone()))?;
        let output = run_node(env, node).await?;

        let closes_pass = graph.outgoing(&node.id).any(|e| {
            e.target == loop_node.id && e.target_handle.as_deref() == Some(end_handle)
        });
        if closes_pass {
            return Ok(());
        }

        let next = if node.kind.is_branching() {
            selected_handle(&output).and_then(|handle| graph.outgoing_by_handle(&node.id, handle))
        } else {
            graph.outgoing(&node.id).next()
        };

        match next {
            Some(edge) => current = edge.target.clone(),
            None => {
                return Err(GraphError::LoopDeadEnd {
                    loop_id: loop_node.id.clone(),
                    node_id: node.id.clone(),
                })
            }
        }
    }
}

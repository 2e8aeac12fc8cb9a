//! Graph execution engine.
//!
//! The [`Scheduler`] walks a [`Graph`](graphrun_core::Graph) from its start
//! node, dispatching each node to the [`NodeExecutor`] registered for its
//! kind. Node outputs, global state and the execution log live in a
//! caller-owned [`RunContext`].

pub mod binding;
pub mod context;
pub mod executor;
pub mod expr;
pub mod gate;
pub mod run_log;
pub mod scheduler;
pub mod walk;

pub use context::RunContext;
pub use executor::{run_node, ExecutorRegistry, NodeEnv, NodeExecutor};
pub use expr::{evaluator_for, is_truthy, CelEvaluator, JinjaEvaluator};
pub use run_log::{BroadcastSink, RunLogger};
pub use scheduler::{RunOutcome, Scheduler};

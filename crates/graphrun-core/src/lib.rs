pub mod config;
pub mod error;
pub mod graph;
pub mod log;
pub mod payload;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{EvalError, GraphError, Result};
pub use graph::{Edge, Graph, GraphDocument, Node, NodeData, NodeKind};
pub use log::{LogEntry, LogPhase};
pub use types::*;

//! Node-graph workflow engine for nodeflow.
//!
//! This crate provides everything needed to describe and run a workflow:
//!
//! - **Graph Model**: Directed acyclic graphs using petgraph, with nodes
//!   joined by port-to-port connections
//! - **Definitions**: JSON workflow documents with shape and structure checks
//! - **Registry**: Node types mapped to async executors and declared ports
//! - **Context**: Per-run variables, shared data, step results and logs
//! - **Engine**: Round-based concurrent execution with retries, timeouts,
//!   conditions and lifecycle events

pub mod builtin;
pub mod condition;
pub mod config;
pub mod context;
pub mod definition;
pub mod edge;
pub mod engine;
pub mod error;
pub mod events;
pub mod execution;
pub mod graph;
mod millis;
pub mod node;
pub mod port;
pub mod registry;
pub mod retry;
pub mod template;

pub use builtin::{builtin_registry, register_builtins};
pub use condition::Condition;
pub use config::EngineConfig;
pub use context::{ContextSnapshot, ExecutionContext, LogEntry};
pub use definition::{Workflow, WorkflowDefinition, WorkflowMetadata};
pub use edge::Connection;
pub use engine::{NodeStatus, ValidationReport, WorkflowEngine, WorkflowStatus};
pub use error::{
    ConditionError, ContextError, DefinitionError, GraphError, NodeExecutionError,
    RegistryError, RunError, ValidationError,
};
pub use events::{EventBus, EventKind, WorkflowEvent};
pub use execution::{EngineState, ExecutionResult, ExecutionState, RunResult, RunStats};
pub use graph::WorkflowGraph;
pub use node::{LogLevel, Node, NodeId, NodeState};
pub use port::{DataKind, PortCatalog, PortDirection, Ports};
pub use registry::{NodeExecutor, NodeInput, NodeRegistry, NodeRegistryBuilder};
pub use retry::RetryPolicy;
pub use template::Variables;

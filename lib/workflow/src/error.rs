//! Error types for the workflow crate.
//!
//! Each layer gets its own enum so callers can add context with rootcause:
//! - `ValidationError`: structural problems found while loading a definition
//! - `GraphError`: low-level graph operations
//! - `NodeExecutionError`: a single executor attempt failing (retried)
//! - `RunError`: why a whole run ended unsuccessfully
//! - `ContextError`, `RegistryError`, `ConditionError`, `DefinitionError`

use crate::execution::ExecutionState;
use crate::node::{NodeId, NodeState};
use crate::port::{DataKind, PortDirection};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A structural problem with a workflow definition.
///
/// Validation collects every problem it can find instead of stopping at the
/// first one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ValidationError {
    /// A required top-level field is absent.
    MissingField { field: String },
    /// An entry could not be parsed.
    MalformedEntry { location: String, reason: String },
    /// Two nodes share an id.
    DuplicateNodeId { node_id: NodeId },
    /// A connection references a node that does not exist.
    DanglingConnection {
        from: NodeId,
        to: NodeId,
        missing: NodeId,
    },
    /// A connection names a port the node type does not declare.
    UnknownPort {
        node_id: NodeId,
        port: String,
        direction: PortDirection,
    },
    /// A connection joins ports with mismatched data kinds.
    IncompatibleConnection {
        from: NodeId,
        from_output: String,
        to: NodeId,
        to_input: String,
        output_kind: DataKind,
        input_kind: DataKind,
    },
    /// The node was revisited while still on the DFS stack.
    CyclicDependency { node_id: NodeId },
    /// A node's run condition does not parse.
    InvalidCondition { node_id: NodeId, reason: String },
    /// Validation was requested with no workflow loaded.
    NoWorkflowLoaded,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { field } => write!(f, "missing required field '{field}'"),
            Self::MalformedEntry { location, reason } => {
                write!(f, "malformed entry at {location}: {reason}")
            }
            Self::DuplicateNodeId { node_id } => write!(f, "duplicate node id: {node_id}"),
            Self::DanglingConnection { from, to, missing } => {
                write!(f, "connection {from} -> {to} references unknown node {missing}")
            }
            Self::UnknownPort {
                node_id,
                port,
                direction,
            } => write!(f, "node {node_id} has no {direction} port '{port}'"),
            Self::IncompatibleConnection {
                from,
                from_output,
                to,
                to_input,
                output_kind,
                input_kind,
            } => write!(
                f,
                "incompatible connection {from}.{from_output} ({output_kind}) -> {to}.{to_input} ({input_kind})"
            ),
            Self::CyclicDependency { node_id } => {
                write!(f, "cyclic dependency through node {node_id}")
            }
            Self::InvalidCondition { node_id, reason } => {
                write!(f, "invalid condition on node {node_id}: {reason}")
            }
            Self::NoWorkflowLoaded => write!(f, "no workflow loaded"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors from graph operations.
///
/// These carry only what the graph knows. Run-level context belongs to the
/// caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Node with the given ID was not found in the graph.
    NodeNotFound { node_id: NodeId },
    /// The requested node state change is not allowed.
    InvalidTransition {
        node_id: NodeId,
        from: NodeState,
        to: NodeState,
    },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeNotFound { node_id } => write!(f, "node not found: {node_id}"),
            Self::InvalidTransition { node_id, from, to } => {
                write!(f, "node {node_id} cannot move from {from} to {to}")
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// A failed attempt of a node executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum NodeExecutionError {
    /// The resolved parameters or inputs were unusable.
    InvalidInput { message: String },
    /// The executor reported a failure.
    ExecutionFailed { message: String },
    /// A collaborator outside the engine failed.
    ExternalService { service: String, message: String },
    /// The attempt exceeded its time limit.
    Timeout { after_ms: u64 },
}

impl NodeExecutionError {
    /// Creates an [`InvalidInput`](Self::InvalidInput) error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates an [`ExecutionFailed`](Self::ExecutionFailed) error.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
        }
    }

    /// Creates an [`ExternalService`](Self::ExternalService) error.
    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for NodeExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput { message } => write!(f, "invalid input: {message}"),
            Self::ExecutionFailed { message } => write!(f, "execution failed: {message}"),
            Self::ExternalService { service, message } => {
                write!(f, "{service} failed: {message}")
            }
            Self::Timeout { after_ms } => write!(f, "timed out after {after_ms}ms"),
        }
    }
}

impl std::error::Error for NodeExecutionError {}

/// Why a run did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RunError {
    /// No executor is registered for a node's type.
    UnknownNodeType { node_id: NodeId, node_type: String },
    /// A node failed after exhausting its attempts.
    NodeFailed { node_id: NodeId, reason: String },
    /// Nodes remain runnable but none are ready.
    StuckExecution { completed: usize, total: usize },
    /// The run exceeded its overall time limit.
    WorkflowTimeout { limit_ms: u64 },
    /// `execute` was called with no workflow loaded.
    NotLoaded,
    /// The loaded workflow fails validation.
    InvalidWorkflow { errors: Vec<ValidationError> },
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownNodeType { node_id, node_type } => {
                write!(f, "unknown node type '{node_type}' for node {node_id}")
            }
            Self::NodeFailed { node_id, reason } => write!(f, "node {node_id} failed: {reason}"),
            Self::StuckExecution { completed, total } => write!(
                f,
                "execution stuck with {completed} of {total} nodes completed"
            ),
            Self::WorkflowTimeout { limit_ms } => {
                write!(f, "workflow timed out after {limit_ms}ms")
            }
            Self::NotLoaded => write!(f, "no workflow loaded"),
            Self::InvalidWorkflow { errors } => {
                write!(f, "workflow is invalid ({} errors)", errors.len())?;
                for error in errors {
                    write!(f, "; {error}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for RunError {}

/// Errors from execution context operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// The requested context state change is not allowed.
    InvalidStateTransition {
        from: ExecutionState,
        to: ExecutionState,
    },
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidStateTransition { from, to } => {
                write!(f, "invalid state transition from {from} to {to}")
            }
        }
    }
}

impl std::error::Error for ContextError {}

/// Errors from building a node registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The same node type was registered twice.
    DuplicateType { node_type: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateType { node_type } => {
                write!(f, "node type '{node_type}' is already registered")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Errors from parsing a run condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    /// The condition is empty.
    Empty,
    /// The condition is not `scope.name op literal` or `exists:name`.
    Malformed { condition: String },
    /// The scope is not `variables`, `var`, `shared` or `sharedData`.
    UnknownScope { scope: String },
    /// The operator is not one of `lt`, `lte`, `gt`, `gte`, `eq`.
    UnknownOperator { operator: String },
}

impl fmt::Display for ConditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "condition is empty"),
            Self::Malformed { condition } => write!(f, "malformed condition: {condition}"),
            Self::UnknownScope { scope } => write!(f, "unknown condition scope '{scope}'"),
            Self::UnknownOperator { operator } => {
                write!(f, "unknown condition operator '{operator}'")
            }
        }
    }
}

impl std::error::Error for ConditionError {}

/// Errors from reading a workflow definition document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// The document is not valid JSON.
    Syntax {
        line: usize,
        column: usize,
        reason: String,
    },
    /// The document parsed but describes an invalid workflow.
    Invalid { errors: Vec<ValidationError> },
}

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax {
                line,
                column,
                reason,
            } => write!(f, "invalid JSON at {line}:{column}: {reason}"),
            Self::Invalid { errors } => {
                write!(f, "invalid workflow definition ({} errors)", errors.len())?;
                for error in errors {
                    write!(f, "; {error}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for DefinitionError {}

//! Workflow node types.
//!
//! Nodes are the units of work in a workflow. Each node has:
//! - An id that is unique within the workflow
//! - A type tag that selects its executor from the [`NodeRegistry`](crate::registry::NodeRegistry)
//! - Opaque parameters (which may contain `${name}` template tokens) and metadata
//! - A per-run [`NodeState`] that only the scheduler advances

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::borrow::Borrow;
use std::fmt;
use std::time::Duration;

/// The identifier of a node within a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node ID from any string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// The state of a single node within a run.
///
/// States only move forward: `Idle -> Running -> {Completed | Error}` or
/// `Idle -> Skipped`. A node never re-enters `Running` within the same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Waiting for dependencies or for the next round.
    #[default]
    Idle,
    /// Dispatched in the current round.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with a failure after all retry attempts.
    Error,
    /// Not run because its condition evaluated false.
    Skipped,
}

impl NodeState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Skipped)
    }

    /// Returns true if a node in this state keeps its dependents from ever running.
    #[must_use]
    pub fn blocks_downstream(&self) -> bool {
        matches!(self, Self::Error | Self::Skipped)
    }

    /// Returns true if moving from `self` to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Running)
                | (Self::Idle, Self::Skipped)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Error)
        )
    }

    /// Returns the lowercase name of this state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log level used by the execution context log stream and the `log` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

fn empty_object() -> JsonValue {
    JsonValue::Object(serde_json::Map::new())
}

/// A workflow node.
///
/// The serialized form is the node entry of a workflow definition document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique identifier for this node within the workflow.
    pub id: NodeId,
    /// The registry key selecting this node's executor.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Human-readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Executor parameters; strings may contain `${name}` tokens.
    #[serde(default = "empty_object")]
    pub parameters: JsonValue,
    /// Free-form metadata, never interpreted by the engine.
    #[serde(default = "empty_object")]
    pub metadata: JsonValue,
    /// When true, a final failure of this node does not abort the run.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub continue_on_error: bool,
    /// Per-attempt timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Retry policy overriding the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Run condition; the node is skipped when it evaluates false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip)]
    state: NodeState,
}

impl Node {
    /// Creates an idle node with empty parameters and metadata.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            title: None,
            parameters: empty_object(),
            metadata: empty_object(),
            continue_on_error: false,
            timeout_ms: None,
            retry: None,
            condition: None,
            state: NodeState::Idle,
        }
    }

    /// Sets the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the executor parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: JsonValue) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }

    /// Marks whether a final failure should leave the rest of the run going.
    #[must_use]
    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Overrides the retry policy for this node.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Sets the run condition.
    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Returns the current state of this node.
    #[must_use]
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Returns the per-attempt timeout, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Returns the title, falling back to the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(self.id.as_str())
    }

    pub(crate) fn set_state(&mut self, state: NodeState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn states_only_move_forward() {
        assert!(NodeState::Idle.can_transition_to(NodeState::Running));
        assert!(NodeState::Idle.can_transition_to(NodeState::Skipped));
        assert!(NodeState::Running.can_transition_to(NodeState::Error));
        assert!(!NodeState::Completed.can_transition_to(NodeState::Running));
        assert!(!NodeState::Error.can_transition_to(NodeState::Running));
        assert!(!NodeState::Idle.can_transition_to(NodeState::Completed));
    }

    #[test]
    fn terminal_states() {
        assert!(!NodeState::Idle.is_terminal());
        assert!(!NodeState::Running.is_terminal());
        assert!(NodeState::Skipped.is_terminal());
        assert!(NodeState::Error.blocks_downstream());
        assert!(!NodeState::Completed.blocks_downstream());
    }

    #[test]
    fn node_parses_definition_entry() {
        let node: Node = serde_json::from_value(json!({
            "id": "login",
            "type": "browser.open",
            "title": "Open login page",
            "parameters": { "url": "${base}/login" },
            "continueOnError": true,
            "timeoutMs": 5000
        }))
        .expect("deserialize");

        assert_eq!(node.id.as_str(), "login");
        assert_eq!(node.node_type, "browser.open");
        assert!(node.continue_on_error);
        assert_eq!(node.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(node.metadata, json!({}));
        assert_eq!(node.state(), NodeState::Idle);
    }

    #[test]
    fn node_serializes_without_defaults() {
        let node = Node::new("a", "noop");
        let value = serde_json::to_value(&node).expect("serialize");
        assert_eq!(
            value,
            json!({ "id": "a", "type": "noop", "parameters": {}, "metadata": {} })
        );
    }

    #[test]
    fn display_name_falls_back_to_id() {
        assert_eq!(Node::new("a", "noop").display_name(), "a");
        assert_eq!(Node::new("a", "noop").with_title("Alpha").display_name(), "Alpha");
    }
}

//! Execution state machines and run results.
//!
//! Two state machines are tracked:
//! - [`ExecutionState`] for a run's execution context
//! - [`EngineState`] for the engine driving the run

use crate::error::{NodeExecutionError, RunError};
use chrono::{DateTime, Utc};
use nodeflow_core::RunId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::time::Duration;

/// The state of an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Created, not yet started.
    #[default]
    Pending,
    /// Rounds are being dispatched.
    Running,
    /// The run finished successfully.
    Completed,
    /// The run ended with a failure.
    Error,
    /// Temporarily halted; may resume or end in error.
    Paused,
}

impl ExecutionState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Returns true if moving from `self` to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Error)
                | (Self::Running, Self::Paused)
                | (Self::Paused, Self::Running)
                | (Self::Paused, Self::Error)
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// The state of the engine across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// No run has started since the workflow was loaded.
    #[default]
    Idle,
    /// A run is in progress.
    Running,
    /// The last run succeeded.
    Completed,
    /// The last run failed.
    Failed,
}

/// The outcome of one node within a run. Never modified once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Whether the last attempt succeeded.
    pub success: bool,
    /// The executor's output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
    /// The last attempt's error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeExecutionError>,
    /// Wall time across all attempts, including backoff.
    #[serde(rename = "executionTimeMs", with = "crate::millis")]
    pub execution_time: Duration,
    /// Always carries `attempts` and `nodeType`.
    pub metadata: serde_json::Map<String, JsonValue>,
    /// When the result was produced.
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(data: JsonValue, execution_time: Duration, attempts: u32, node_type: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            execution_time,
            metadata: Self::base_metadata(attempts, node_type),
            finished_at: Utc::now(),
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failure(
        error: NodeExecutionError,
        execution_time: Duration,
        attempts: u32,
        node_type: &str,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            execution_time,
            metadata: Self::base_metadata(attempts, node_type),
            finished_at: Utc::now(),
        }
    }

    fn base_metadata(attempts: u32, node_type: &str) -> serde_json::Map<String, JsonValue> {
        let mut metadata = serde_json::Map::new();
        metadata.insert("attempts".to_string(), JsonValue::from(attempts));
        metadata.insert("nodeType".to_string(), JsonValue::from(node_type));
        metadata
    }

    /// Number of attempts made.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.metadata
            .get("attempts")
            .and_then(JsonValue::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0)
    }

    /// The value delivered through the named output: the field of an object
    /// result when present, otherwise the whole result.
    #[must_use]
    pub fn output(&self, name: &str) -> JsonValue {
        match &self.data {
            Some(JsonValue::Object(fields)) => fields
                .get(name)
                .cloned()
                .unwrap_or_else(|| JsonValue::Object(fields.clone())),
            Some(other) => other.clone(),
            None => JsonValue::Null,
        }
    }
}

/// Counters describing a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub total_nodes: usize,
    pub completed_nodes: usize,
    pub failed_nodes: usize,
    pub skipped_nodes: usize,
    pub execution_time_ms: u64,
    pub rounds: u32,
}

/// The result of [`WorkflowEngine::execute`](crate::engine::WorkflowEngine::execute).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_id: RunId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    pub stats: RunStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_state_transitions() {
        assert!(ExecutionState::Pending.can_transition_to(ExecutionState::Running));
        assert!(ExecutionState::Running.can_transition_to(ExecutionState::Paused));
        assert!(ExecutionState::Paused.can_transition_to(ExecutionState::Running));
        assert!(ExecutionState::Paused.can_transition_to(ExecutionState::Error));
        assert!(!ExecutionState::Paused.can_transition_to(ExecutionState::Completed));
        assert!(!ExecutionState::Pending.can_transition_to(ExecutionState::Completed));
        assert!(!ExecutionState::Completed.can_transition_to(ExecutionState::Running));
    }

    #[test]
    fn result_metadata_carries_attempts_and_type() {
        let result = ExecutionResult::failure(
            NodeExecutionError::failed("boom"),
            Duration::from_millis(300),
            3,
            "fetch",
        );
        assert!(!result.success);
        assert_eq!(result.attempts(), 3);
        assert_eq!(result.metadata.get("nodeType"), Some(&json!("fetch")));

        let value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(value["executionTimeMs"], json!(300));
        assert!(value.get("data").is_none());
    }

    #[test]
    fn output_selects_named_field() {
        let result = ExecutionResult::success(
            json!({ "html": "<p>", "status": 200 }),
            Duration::ZERO,
            1,
            "fetch",
        );
        assert_eq!(result.output("html"), json!("<p>"));
        assert_eq!(result.output("output"), json!({ "html": "<p>", "status": 200 }));

        let scalar = ExecutionResult::success(json!(42), Duration::ZERO, 1, "count");
        assert_eq!(scalar.output("html"), json!(42));
    }
}

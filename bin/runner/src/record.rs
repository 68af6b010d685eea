//! Persisted run records.

use crate::error::RunnerError;
use chrono::{DateTime, Utc};
use nodeflow_core::RunId;
use nodeflow_workflow::{ExecutionContext, ExecutionResult, NodeId, RunError, RunResult, Variables};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Wall-clock timing of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTiming {
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub execution_time_ms: u64,
}

/// The JSON document written after each run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: RunId,
    pub success: bool,
    pub error: Option<RunError>,
    pub variables: Variables,
    pub step_results: BTreeMap<NodeId, ExecutionResult>,
    pub timing: RunTiming,
}

impl RunRecord {
    /// Builds a record from a run's result and, if the run got that far, its
    /// context.
    #[must_use]
    pub fn new(result: &RunResult, context: Option<&ExecutionContext>) -> Self {
        Self {
            run_id: result.run_id,
            success: result.success,
            error: result.error.clone(),
            variables: context.map(ExecutionContext::variables).unwrap_or_default(),
            step_results: context
                .map(ExecutionContext::step_results)
                .unwrap_or_default(),
            timing: RunTiming {
                started_at: context.and_then(ExecutionContext::started_at),
                ended_at: context.and_then(ExecutionContext::ended_at),
                execution_time_ms: result.stats.execution_time_ms,
            },
        }
    }

    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.json", self.run_id)
    }

    /// Writes the record into `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns `WriteRecord` if the directory or file cannot be written.
    pub fn write_to_dir(&self, dir: &Path) -> nodeflow_core::Result<PathBuf, RunnerError> {
        let path = dir.join(self.file_name());
        let write_error = |details: String| RunnerError::WriteRecord {
            path: path.clone(),
            details,
        };

        std::fs::create_dir_all(dir).map_err(|e| write_error(e.to_string()))?;
        let json = serde_json::to_string_pretty(self).map_err(|e| write_error(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| write_error(e.to_string()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeflow_workflow::{EventBus, ExecutionState, RunStats};
    use serde_json::{Value as JsonValue, json};
    use std::time::Duration;

    fn finished_context() -> ExecutionContext {
        let context = ExecutionContext::new(RunId::new(), Variables::new(), EventBus::new());
        context.set_state(ExecutionState::Running).expect("start");
        context.set_variable("page", json!(3));
        context.add_step_result(
            NodeId::from("fetch"),
            ExecutionResult::success(json!({ "rows": 2 }), Duration::from_millis(12), 1, "noop"),
        );
        context.set_state(ExecutionState::Completed).expect("finish");
        context
    }

    #[test]
    fn record_is_written_as_run_id_json() {
        let context = finished_context();
        let result = RunResult {
            run_id: context.run_id(),
            success: true,
            error: None,
            stats: RunStats {
                total_nodes: 1,
                completed_nodes: 1,
                execution_time_ms: 12,
                rounds: 1,
                ..RunStats::default()
            },
        };
        let record = RunRecord::new(&result, Some(&context));

        let dir = tempfile::tempdir().expect("tempdir");
        let path = record
            .write_to_dir(&dir.path().join("runs"))
            .expect("write");
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some(format!("{}.json", result.run_id).as_str())
        );

        let written: JsonValue =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(written["success"], json!(true));
        assert_eq!(written["variables"]["page"], json!(3));
        assert_eq!(written["stepResults"]["fetch"]["data"]["rows"], json!(2));
        assert_eq!(written["timing"]["executionTimeMs"], json!(12));
        assert!(written["timing"]["startedAt"].is_string());
        assert!(written["timing"]["endedAt"].is_string());

        let parsed: RunRecord = serde_json::from_value(written).expect("record");
        assert_eq!(parsed, record);
    }

    #[test]
    fn record_without_context_is_empty() {
        let result = RunResult {
            run_id: RunId::new(),
            success: false,
            error: Some(RunError::NotLoaded),
            stats: RunStats::default(),
        };
        let record = RunRecord::new(&result, None);
        assert!(record.variables.is_empty());
        assert!(record.step_results.is_empty());
        assert_eq!(record.timing.started_at, None);
    }
}

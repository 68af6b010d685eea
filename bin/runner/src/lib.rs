//! nodeflow workflow runner.
//!
//! Loads a workflow definition from disk, runs it once with the built-in
//! node types and optionally persists a [`RunRecord`].

pub mod config;
pub mod error;
pub mod record;

use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::record::RunRecord;
use nodeflow_workflow::{
    EventKind, RunResult, WorkflowDefinition, WorkflowEngine, WorkflowEvent, builtin_registry,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Reads and parses a definition file.
///
/// # Errors
///
/// Returns `ReadDefinition` or `ParseDefinition`.
pub fn read_definition(path: &Path) -> nodeflow_core::Result<WorkflowDefinition, RunnerError> {
    let text = std::fs::read_to_string(path).map_err(|e| RunnerError::ReadDefinition {
        path: path.to_path_buf(),
        details: e.to_string(),
    })?;
    let definition =
        WorkflowDefinition::from_json_str(&text).map_err(|e| RunnerError::ParseDefinition {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;
    Ok(definition)
}

fn log_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::NodeFailed {
            node_id,
            error,
            attempts,
            ..
        } => warn!(%node_id, %error, attempts, "node failed"),
        WorkflowEvent::NodeRetrying {
            node_id,
            attempt,
            delay_ms,
            ..
        } => debug!(%node_id, attempt, delay_ms, "node retrying"),
        other => debug!(kind = ?other.kind(), node_id = ?other.node_id(), "workflow event"),
    }
}

/// Runs the configured workflow once.
///
/// A run that executes but fails is still `Ok`; check
/// [`RunResult::success`].
///
/// # Errors
///
/// Returns an error if the definition cannot be loaded or the record cannot
/// be written.
#[instrument(skip_all, fields(workflow = %config.workflow_path.display()))]
pub async fn run(config: &RunnerConfig) -> nodeflow_core::Result<RunResult, RunnerError> {
    let definition = read_definition(&config.workflow_path)?;

    let registry = builtin_registry().map_err(|e| RunnerError::Registry {
        details: e.to_string(),
    })?;
    let mut engine = WorkflowEngine::with_config(Arc::new(registry), config.engine.clone());
    engine.on_any(log_event);
    engine.on(EventKind::ExecutionProgress, |event| {
        if let WorkflowEvent::ExecutionProgress {
            round,
            completed,
            total,
            ..
        } = event
        {
            info!(round, completed, total, "round finished");
        }
    });

    engine
        .load_workflow(definition)
        .map_err(|errors| RunnerError::InvalidWorkflow {
            path: config.workflow_path.clone(),
            errors: errors.iter().map(ToString::to_string).collect(),
        })?;

    let result = engine.execute().await;
    match &result.error {
        None => info!(run_id = %result.run_id, rounds = result.stats.rounds, "run succeeded"),
        Some(error) => warn!(run_id = %result.run_id, %error, "run failed"),
    }

    if let Some(dir) = &config.record_dir {
        let path = RunRecord::new(&result, engine.last_context()).write_to_dir(dir)?;
        info!(path = %path.display(), "run record written");
    }

    Ok(result)
}

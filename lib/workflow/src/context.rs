//! Run-scoped mutable state shared by the engine and node executors.
//!
//! An [`ExecutionContext`] is a cheap clonable handle. Every mutation goes
//! through one lock, so executors running concurrently in the same round
//! observe a consistent view.

use crate::error::ContextError;
use crate::events::{EventBus, WorkflowEvent};
use crate::execution::{ExecutionResult, ExecutionState};
use crate::node::{LogLevel, NodeId};
use crate::template::Variables;
use chrono::{DateTime, Utc};
use nodeflow_core::RunId;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One entry of the context's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
}

/// A point-in-time copy of a context.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub run_id: RunId,
    pub state: ExecutionState,
    pub variables: Variables,
    pub shared_data: Variables,
    pub step_results: BTreeMap<NodeId, ExecutionResult>,
    pub logs: Vec<LogEntry>,
    pub execution_stack: Vec<NodeId>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct ContextState {
    variables: Variables,
    shared: Variables,
    step_results: HashMap<NodeId, ExecutionResult>,
    logs: Vec<LogEntry>,
    state: ExecutionState,
    stack: Vec<NodeId>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct ContextInner {
    run_id: RunId,
    events: EventBus,
    state: Mutex<ContextState>,
}

/// Mutable state for one run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl ExecutionContext {
    /// Creates a pending context seeded with `variables`.
    #[must_use]
    pub fn new(run_id: RunId, variables: Variables, events: EventBus) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                run_id,
                events,
                state: Mutex::new(ContextState {
                    variables,
                    ..ContextState::default()
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the run this context belongs to.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.inner.run_id
    }

    /// Sets a variable, returning the previous value.
    pub fn set_variable(&self, name: impl Into<String>, value: JsonValue) -> Option<JsonValue> {
        self.lock().variables.insert(name.into(), value)
    }

    #[must_use]
    pub fn get_variable(&self, name: &str) -> Option<JsonValue> {
        self.lock().variables.get(name).cloned()
    }

    #[must_use]
    pub fn has_variable(&self, name: &str) -> bool {
        self.lock().variables.contains_key(name)
    }

    /// Removes a variable, returning its value.
    pub fn delete_variable(&self, name: &str) -> Option<JsonValue> {
        self.lock().variables.remove(name)
    }

    /// Returns a copy of all variables.
    #[must_use]
    pub fn variables(&self) -> Variables {
        self.lock().variables.clone()
    }

    /// Stores a scratch value, returning the previous one.
    pub fn set_shared_data(&self, key: impl Into<String>, value: JsonValue) -> Option<JsonValue> {
        self.lock().shared.insert(key.into(), value)
    }

    #[must_use]
    pub fn get_shared_data(&self, key: &str) -> Option<JsonValue> {
        self.lock().shared.get(key).cloned()
    }

    /// Returns a copy of all scratch data.
    #[must_use]
    pub fn shared_data(&self) -> Variables {
        self.lock().shared.clone()
    }

    /// Records a node's result, replacing any earlier one.
    pub fn add_step_result(&self, node_id: NodeId, result: ExecutionResult) {
        self.lock().step_results.insert(node_id, result);
    }

    #[must_use]
    pub fn get_step_result(&self, node_id: &str) -> Option<ExecutionResult> {
        self.lock().step_results.get(node_id).cloned()
    }

    /// Returns every recorded result, ordered by node id.
    #[must_use]
    pub fn step_results(&self) -> BTreeMap<NodeId, ExecutionResult> {
        self.lock()
            .step_results
            .iter()
            .map(|(id, result)| (id.clone(), result.clone()))
            .collect()
    }

    /// Appends a log entry and mirrors it to `tracing`.
    pub fn log(&self, level: LogLevel, message: impl Into<String>, node_id: Option<&NodeId>) {
        let message = message.into();
        let run_id = self.inner.run_id;
        match level {
            LogLevel::Debug => tracing::debug!(%run_id, node_id = ?node_id, "{message}"),
            LogLevel::Info => tracing::info!(%run_id, node_id = ?node_id, "{message}"),
            LogLevel::Warn => tracing::warn!(%run_id, node_id = ?node_id, "{message}"),
            LogLevel::Error => tracing::error!(%run_id, node_id = ?node_id, "{message}"),
        }

        self.lock().logs.push(LogEntry {
            timestamp: Utc::now(),
            level,
            message,
            node_id: node_id.cloned(),
        });
    }

    #[must_use]
    pub fn logs(&self) -> Vec<LogEntry> {
        self.lock().logs.clone()
    }

    #[must_use]
    pub fn state(&self) -> ExecutionState {
        self.lock().state
    }

    /// Moves the context to `next` and publishes `ContextStateChanged`.
    ///
    /// Entering `Running` the first time stamps the start; reaching
    /// `Completed` or `Error` stamps the end.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` if the move is not allowed.
    pub fn set_state(&self, next: ExecutionState) -> Result<(), ContextError> {
        let from = {
            let mut state = self.lock();
            let from = state.state;
            if !from.can_transition_to(next) {
                return Err(ContextError::InvalidStateTransition { from, to: next });
            }
            state.state = next;
            let now = Utc::now();
            if next == ExecutionState::Running && state.started_at.is_none() {
                state.started_at = Some(now);
            }
            if next.is_terminal() {
                state.ended_at = Some(now);
            }
            from
        };

        self.inner.events.publish(WorkflowEvent::ContextStateChanged {
            run_id: self.inner.run_id,
            from,
            to: next,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Marks a node as being traced.
    pub fn push_frame(&self, node_id: NodeId) {
        self.lock().stack.push(node_id);
    }

    /// Stops tracing a node. Returns false if it was not on the stack.
    pub fn pop_frame(&self, node_id: &str) -> bool {
        let mut state = self.lock();
        match state.stack.iter().rposition(|id| id.as_str() == node_id) {
            Some(position) => {
                state.stack.remove(position);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn execution_stack(&self) -> Vec<NodeId> {
        self.lock().stack.clone()
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lock().started_at
    }

    #[must_use]
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.lock().ended_at
    }

    /// Returns a serialisable copy of the whole context.
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        let state = self.lock();
        ContextSnapshot {
            run_id: self.inner.run_id,
            state: state.state,
            variables: state.variables.clone(),
            shared_data: state.shared.clone(),
            step_results: state
                .step_results
                .iter()
                .map(|(id, result)| (id.clone(), result.clone()))
                .collect(),
            logs: state.logs.clone(),
            execution_stack: state.stack.clone(),
            started_at: state.started_at,
            ended_at: state.ended_at,
        }
    }
}

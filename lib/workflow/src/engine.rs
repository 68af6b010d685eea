//! The workflow engine.
//!
//! The engine owns a registry, an event bus and at most one loaded workflow.
//! Each call to [`WorkflowEngine::execute`] runs the workflow in rounds:
//! 1. Compute the ready set from current node states
//! 2. Skip ready nodes whose condition is false
//! 3. Dispatch the rest as concurrent tasks, retrying per node
//! 4. Wait for every task of the round, then record results
//!
//! The loop ends when nothing is ready: successfully if every remaining node
//! is terminal or blocked behind a failed or skipped dependency, as stuck
//! otherwise. A global deadline bounds the whole run.

use crate::condition::Condition;
use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::definition::{Workflow, WorkflowDefinition, WorkflowMetadata};
use crate::edge::Connection;
use crate::error::{NodeExecutionError, RunError, ValidationError};
use crate::events::{EventBus, EventKind, WorkflowEvent};
use crate::execution::{
    EngineState, ExecutionResult, ExecutionState, RunResult, RunStats,
};
use crate::graph::WorkflowGraph;
use crate::node::{LogLevel, Node, NodeId, NodeState};
use crate::registry::{NodeExecutor, NodeInput, NodeRegistry};
use crate::retry::RetryPolicy;
use crate::template::{self, Variables};
use chrono::Utc;
use futures::future::join_all;
use nodeflow_core::{RunId, SubscriptionId, WorkflowId};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Outcome of [`WorkflowEngine::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

/// One node as reported by [`WorkflowEngine::workflow_status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub id: NodeId,
    pub node_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub state: NodeState,
    pub dependencies: Vec<NodeId>,
}

/// A snapshot of the loaded workflow and its last run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<WorkflowId>,
    pub metadata: WorkflowMetadata,
    pub state: EngineState,
    pub nodes: Vec<NodeStatus>,
    pub connections: Vec<Connection>,
    pub variables: Variables,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<RunStats>,
}

/// Runs workflows against a fixed node registry.
#[derive(Debug)]
pub struct WorkflowEngine {
    registry: Arc<NodeRegistry>,
    config: EngineConfig,
    events: EventBus,
    workflow: Option<Workflow>,
    state: EngineState,
    last_stats: Option<RunStats>,
    last_context: Option<ExecutionContext>,
}

impl WorkflowEngine {
    /// Creates an engine with the default configuration.
    #[must_use]
    pub fn new(registry: NodeRegistry) -> Self {
        Self::with_config(Arc::new(registry), EngineConfig::default())
    }

    /// Creates an engine sharing `registry` with other engines.
    #[must_use]
    pub fn with_config(registry: Arc<NodeRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            config,
            events: EventBus::new(),
            workflow: None,
            state: EngineState::Idle,
            last_stats: None,
            last_context: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Validates `definition` and makes it the workflow future runs execute.
    ///
    /// On failure the previously loaded workflow, if any, stays loaded.
    ///
    /// # Errors
    ///
    /// Returns every structural problem found in the definition.
    pub fn load_workflow(
        &mut self,
        definition: WorkflowDefinition,
    ) -> Result<(), Vec<ValidationError>> {
        let workflow = Workflow::from_definition(definition, self.registry.as_ref())?;
        info!(
            workflow_id = %workflow.id(),
            nodes = workflow.graph().node_count(),
            connections = workflow.graph().connection_count(),
            "workflow loaded"
        );
        self.workflow = Some(workflow);
        self.state = EngineState::Idle;
        self.last_stats = None;
        self.last_context = None;
        Ok(())
    }

    /// Re-validates the loaded workflow.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let errors = match &self.workflow {
            Some(workflow) => workflow.graph().validate_with(self.registry.as_ref()),
            None => vec![ValidationError::NoWorkflowLoaded],
        };
        ValidationReport {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Runs the loaded workflow once with a fresh context.
    pub async fn execute(&mut self) -> RunResult {
        self.run(RunId::new()).await
    }

    #[instrument(skip_all, fields(%run_id))]
    async fn run(&mut self, run_id: RunId) -> RunResult {
        let Some(workflow) = self.workflow.as_mut() else {
            warn!("execute called with no workflow loaded");
            return RunResult {
                run_id,
                success: false,
                error: Some(RunError::NotLoaded),
                stats: RunStats::default(),
            };
        };

        let errors = workflow.graph().validate_with(self.registry.as_ref());
        if !errors.is_empty() {
            warn!(errors = errors.len(), "refusing to run invalid workflow");
            return RunResult {
                run_id,
                success: false,
                error: Some(RunError::InvalidWorkflow { errors }),
                stats: RunStats::default(),
            };
        }

        let workflow_id = workflow.id();
        let context =
            ExecutionContext::new(run_id, workflow.variables().clone(), self.events.clone());
        self.last_context = Some(context.clone());
        self.state = EngineState::Running;

        let graph = workflow.graph_mut();
        graph.reset_states();
        let total_nodes = graph.node_count();

        if let Err(e) = context.set_state(ExecutionState::Running) {
            warn!(error = %e, "fresh context refused to start");
        }
        info!(%workflow_id, total_nodes, "workflow run started");
        self.events.publish(WorkflowEvent::WorkflowStarted {
            run_id,
            workflow_id,
            total_nodes,
            timestamp: Utc::now(),
        });

        let started = Instant::now();
        let mut run_loop = RunLoop {
            graph,
            registry: &self.registry,
            config: &self.config,
            events: &self.events,
            context: context.clone(),
            run_id,
            deadline: deadline_after(started, self.config.max_execution_time()),
            rounds: 0,
        };
        let outcome = run_loop.drive().await;
        let rounds = run_loop.rounds;

        let stats = collect_stats(
            workflow.graph(),
            rounds,
            started.elapsed(),
        );

        let (success, error) = match outcome {
            Ok(()) => {
                if let Err(e) = context.set_state(ExecutionState::Completed) {
                    warn!(error = %e, "context did not complete cleanly");
                }
                info!(
                    completed = stats.completed_nodes,
                    failed = stats.failed_nodes,
                    skipped = stats.skipped_nodes,
                    rounds,
                    "workflow run completed"
                );
                self.events.publish(WorkflowEvent::WorkflowCompleted {
                    run_id,
                    stats: stats.clone(),
                    timestamp: Utc::now(),
                });
                (true, None)
            }
            Err(error) => {
                if let Err(e) = context.set_state(ExecutionState::Error) {
                    warn!(error = %e, "context did not fail cleanly");
                }
                context.log(LogLevel::Error, format!("run failed: {error}"), None);
                self.events.publish(WorkflowEvent::WorkflowFailed {
                    run_id,
                    error: error.clone(),
                    stats: stats.clone(),
                    timestamp: Utc::now(),
                });
                (false, Some(error))
            }
        };

        self.state = if success {
            EngineState::Completed
        } else {
            EngineState::Failed
        };
        self.last_stats = Some(stats.clone());

        RunResult {
            run_id,
            success,
            error,
            stats,
        }
    }

    /// Calls `handler` for every event of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&WorkflowEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, handler)
    }

    /// Calls `handler` for every event.
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&WorkflowEvent) + Send + Sync + 'static,
    {
        self.events.on_any(handler)
    }

    /// Returns a channel receiving every event.
    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<WorkflowEvent>) {
        self.events.subscribe()
    }

    /// Removes a subscription.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.events.off(id)
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Describes the loaded workflow, its node states and the last run's
    /// statistics.
    #[must_use]
    pub fn workflow_status(&self) -> WorkflowStatus {
        let Some(workflow) = &self.workflow else {
            return WorkflowStatus {
                workflow_id: None,
                metadata: WorkflowMetadata::default(),
                state: self.state,
                nodes: Vec::new(),
                connections: Vec::new(),
                variables: Variables::new(),
                stats: None,
            };
        };

        let graph = workflow.graph();
        let variables = match &self.last_context {
            Some(context) => context.variables(),
            None => workflow.variables().clone(),
        };
        WorkflowStatus {
            workflow_id: Some(workflow.id()),
            metadata: workflow.metadata().clone(),
            state: self.state,
            nodes: graph
                .nodes()
                .map(|node| NodeStatus {
                    id: node.id.clone(),
                    node_type: node.node_type.clone(),
                    title: node.title.clone(),
                    state: node.state(),
                    dependencies: graph.dependencies(node.id.as_str()),
                })
                .collect(),
            connections: graph.connections().cloned().collect(),
            variables,
            stats: self.last_stats.clone(),
        }
    }

    /// Returns the loaded workflow as a definition document.
    #[must_use]
    pub fn export_workflow(&self) -> Option<WorkflowDefinition> {
        self.workflow.as_ref().map(Workflow::to_definition)
    }

    /// Returns the context of the most recent run.
    #[must_use]
    pub fn last_context(&self) -> Option<&ExecutionContext> {
        self.last_context.as_ref()
    }

    #[must_use]
    pub fn last_stats(&self) -> Option<&RunStats> {
        self.last_stats.as_ref()
    }
}

fn deadline_after(start: Instant, limit: Duration) -> Instant {
    start
        .checked_add(limit)
        .unwrap_or_else(|| start + Duration::from_secs(60 * 60 * 24 * 365))
}

fn collect_stats(graph: &WorkflowGraph, rounds: u32, elapsed: Duration) -> RunStats {
    let mut stats = RunStats {
        total_nodes: graph.node_count(),
        execution_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        rounds,
        ..RunStats::default()
    };
    for node in graph.nodes() {
        match node.state() {
            NodeState::Completed => stats.completed_nodes += 1,
            NodeState::Error => stats.failed_nodes += 1,
            NodeState::Skipped => stats.skipped_nodes += 1,
            NodeState::Idle | NodeState::Running => {}
        }
    }
    stats
}

/// A node dispatched in the current round.
struct Dispatched {
    node_id: NodeId,
    node_type: String,
    continue_on_error: bool,
}

/// What a node's task reports back to the coordinator.
struct NodeOutcome {
    result: Result<JsonValue, NodeExecutionError>,
    attempts: u32,
    elapsed: Duration,
}

/// Everything a node's task needs; moved into the spawned task.
struct Attempt {
    executor: Arc<dyn NodeExecutor>,
    context: ExecutionContext,
    events: EventBus,
    input: NodeInput,
    policy: RetryPolicy,
    timeout: Option<Duration>,
    semaphore: Option<Arc<Semaphore>>,
    round: u32,
}

impl Attempt {
    async fn run(mut self) -> NodeOutcome {
        let _permit = match self.semaphore.take() {
            Some(semaphore) => semaphore.acquire_owned().await.ok(),
            None => None,
        };

        // Published once the node holds its concurrency slot.
        self.events.publish(WorkflowEvent::NodeStarted {
            run_id: self.context.run_id(),
            node_id: self.input.node_id.clone(),
            node_type: self.input.node_type.clone(),
            round: self.round,
            timestamp: Utc::now(),
        });

        let started = Instant::now();
        let attempts = self.policy.attempts();
        let mut attempt = 1;
        loop {
            self.input.attempt = attempt;
            let result = self.attempt_once().await;
            match result {
                Err(error) if attempt < attempts => {
                    let delay = self.policy.delay(attempt);
                    self.context.log(
                        LogLevel::Warn,
                        format!("attempt {attempt} failed: {error}; retrying in {delay:?}"),
                        Some(&self.input.node_id),
                    );
                    self.events.publish(WorkflowEvent::NodeRetrying {
                        run_id: self.context.run_id(),
                        node_id: self.input.node_id.clone(),
                        attempt,
                        delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error,
                        timestamp: Utc::now(),
                    });
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => {
                    return NodeOutcome {
                        result,
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    };
                }
            }
        }
    }

    async fn attempt_once(&self) -> Result<JsonValue, NodeExecutionError> {
        let call = self.executor.execute(&self.context, &self.input);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or_else(|_| {
                    Err(NodeExecutionError::Timeout {
                        after_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    })
                }),
            None => call.await,
        }
    }
}

/// Coordinator state for one run. Only this loop writes node states.
struct RunLoop<'a> {
    graph: &'a mut WorkflowGraph,
    registry: &'a NodeRegistry,
    config: &'a EngineConfig,
    events: &'a EventBus,
    context: ExecutionContext,
    run_id: RunId,
    deadline: Instant,
    rounds: u32,
}

impl RunLoop<'_> {
    async fn drive(&mut self) -> Result<(), RunError> {
        loop {
            if Instant::now() >= self.deadline {
                return Err(self.timed_out());
            }

            let ready = self.graph.ready_nodes(&self.graph.node_states());
            let mut dispatch = Vec::with_capacity(ready.len());
            let mut skipped_any = false;
            for node_id in ready {
                let Some(node) = self.graph.get_node(node_id.as_str()) else {
                    continue;
                };
                if let Some(reason) = self.skip_reason(node) {
                    self.skip(&node_id, reason)?;
                    skipped_any = true;
                } else {
                    dispatch.push(node_id);
                }
            }

            if dispatch.is_empty() {
                if skipped_any {
                    continue;
                }
                return self.finish();
            }

            self.run_round(dispatch).await?;
        }
    }

    fn skip_reason(&self, node: &Node) -> Option<String> {
        let source = node.condition.as_deref()?;
        match source.parse::<Condition>() {
            Ok(condition) if condition.evaluate(&self.context) => None,
            Ok(_) => Some(format!("condition '{source}' is false")),
            Err(e) => Some(format!("condition '{source}' is invalid: {e}")),
        }
    }

    fn skip(&mut self, node_id: &NodeId, reason: String) -> Result<(), RunError> {
        self.set_state(node_id, NodeState::Skipped)?;
        debug!(%node_id, %reason, "node skipped");
        self.context
            .log(LogLevel::Info, format!("skipped: {reason}"), Some(node_id));
        self.events.publish(WorkflowEvent::NodeSkipped {
            run_id: self.run_id,
            node_id: node_id.clone(),
            reason,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Nothing is ready: finish, or report that runnable nodes are stuck.
    fn finish(&self) -> Result<(), RunError> {
        let states = self.graph.node_states();
        let blocked: HashSet<NodeId> = self.graph.blocked_nodes(&states).into_iter().collect();
        let waiting = states
            .iter()
            .filter(|(id, state)| !state.is_terminal() && !blocked.contains(*id))
            .count();

        if waiting > 0 {
            let completed = states
                .values()
                .filter(|state| **state == NodeState::Completed)
                .count();
            warn!(waiting, completed, "no node is ready but work remains");
            return Err(RunError::StuckExecution {
                completed,
                total: states.len(),
            });
        }

        if !blocked.is_empty() {
            debug!(blocked = blocked.len(), "nodes blocked behind failed or skipped dependencies");
        }
        Ok(())
    }

    fn set_state(&mut self, node_id: &NodeId, state: NodeState) -> Result<(), RunError> {
        self.graph
            .set_node_state(node_id.as_str(), state)
            .map_err(|e| RunError::NodeFailed {
                node_id: node_id.clone(),
                reason: e.to_string(),
            })
    }

    fn timed_out(&self) -> RunError {
        RunError::WorkflowTimeout {
            limit_ms: self.config.max_execution_time_ms,
        }
    }

    fn collect_inputs(&self, node_id: &NodeId) -> HashMap<String, JsonValue> {
        let mut inputs = HashMap::new();
        for connection in self.graph.incoming(node_id.as_str()) {
            if let Some(result) = self.context.get_step_result(connection.from.as_str()) {
                inputs.insert(
                    connection.to_input.clone(),
                    result.output(&connection.from_output),
                );
            }
        }
        inputs
    }

    /// Fails the run on the first ready node whose type has no executor.
    fn resolve_executors(
        &mut self,
        dispatch: &[NodeId],
    ) -> Result<Vec<Arc<dyn NodeExecutor>>, RunError> {
        let mut executors = Vec::with_capacity(dispatch.len());
        for node_id in dispatch {
            let node_type = self
                .graph
                .get_node(node_id.as_str())
                .map(|node| node.node_type.clone())
                .unwrap_or_default();
            match self.registry.executor(&node_type) {
                Some(executor) => executors.push(executor),
                None => {
                    self.set_state(node_id, NodeState::Running)?;
                    self.set_state(node_id, NodeState::Error)?;
                    let error =
                        NodeExecutionError::failed(format!("unknown node type '{node_type}'"));
                    self.context.add_step_result(
                        node_id.clone(),
                        ExecutionResult::failure(error.clone(), Duration::ZERO, 0, &node_type),
                    );
                    self.events.publish(WorkflowEvent::NodeFailed {
                        run_id: self.run_id,
                        node_id: node_id.clone(),
                        error,
                        attempts: 0,
                        timestamp: Utc::now(),
                    });
                    return Err(RunError::UnknownNodeType {
                        node_id: node_id.clone(),
                        node_type,
                    });
                }
            }
        }
        Ok(executors)
    }

    async fn run_round(&mut self, dispatch: Vec<NodeId>) -> Result<(), RunError> {
        let executors = self.resolve_executors(&dispatch)?;

        self.rounds += 1;
        let round = self.rounds;
        let variables = self.context.variables();
        let semaphore = self
            .config
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        debug!(round, nodes = dispatch.len(), "dispatching round");

        let mut dispatched = Vec::with_capacity(dispatch.len());
        let mut tasks = Vec::with_capacity(dispatch.len());
        for (node_id, executor) in dispatch.into_iter().zip(executors) {
            let Some(node) = self.graph.get_node(node_id.as_str()).cloned() else {
                continue;
            };
            let input = NodeInput {
                node_id: node_id.clone(),
                node_type: node.node_type.clone(),
                attempt: 1,
                parameters: template::resolve_value(&node.parameters, &variables),
                inputs: self.collect_inputs(&node_id),
            };
            let attempt = Attempt {
                executor,
                context: self.context.clone(),
                events: self.events.clone(),
                input,
                policy: node.retry.unwrap_or(self.config.default_retry),
                timeout: node.timeout().or_else(|| self.config.node_timeout()),
                semaphore: semaphore.clone(),
                round,
            };

            self.set_state(&node_id, NodeState::Running)?;
            self.context.push_frame(node_id.clone());

            tasks.push(tokio::spawn(attempt.run()));
            dispatched.push(Dispatched {
                node_id,
                node_type: node.node_type,
                continue_on_error: node.continue_on_error,
            });
        }

        // Tasks still running past the deadline are detached, not aborted.
        let joined = tokio::time::timeout_at(self.deadline, join_all(tasks))
            .await
            .map_err(|_| self.timed_out())?;

        let mut abort = None;
        for (node, joined) in dispatched.into_iter().zip(joined) {
            let outcome = joined.unwrap_or_else(|e| NodeOutcome {
                result: Err(NodeExecutionError::failed(format!("node task ended abnormally: {e}"))),
                attempts: 0,
                elapsed: Duration::ZERO,
            });
            if let Some(error) = self.record(&node, outcome)? {
                abort.get_or_insert(error);
            }
        }

        let states = self.graph.node_states();
        let count = |wanted: NodeState| states.values().filter(|s| **s == wanted).count();
        self.events.publish(WorkflowEvent::ExecutionProgress {
            run_id: self.run_id,
            round,
            completed: count(NodeState::Completed),
            failed: count(NodeState::Error),
            skipped: count(NodeState::Skipped),
            total: states.len(),
            timestamp: Utc::now(),
        });

        match abort {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Stores a settled node's result. Returns the run error if the failure
    /// should abort the run.
    fn record(
        &mut self,
        node: &Dispatched,
        outcome: NodeOutcome,
    ) -> Result<Option<RunError>, RunError> {
        let node_id = &node.node_id;
        self.context.pop_frame(node_id.as_str());

        match outcome.result {
            Ok(data) => {
                let result = ExecutionResult::success(
                    data,
                    outcome.elapsed,
                    outcome.attempts,
                    &node.node_type,
                );
                self.context.add_step_result(node_id.clone(), result.clone());
                self.set_state(node_id, NodeState::Completed)?;
                self.context.log(
                    LogLevel::Info,
                    format!("completed in {}ms", outcome.elapsed.as_millis()),
                    Some(node_id),
                );
                self.events.publish(WorkflowEvent::NodeCompleted {
                    run_id: self.run_id,
                    node_id: node_id.clone(),
                    result,
                    timestamp: Utc::now(),
                });
                Ok(None)
            }
            Err(error) => {
                self.context.add_step_result(
                    node_id.clone(),
                    ExecutionResult::failure(
                        error.clone(),
                        outcome.elapsed,
                        outcome.attempts,
                        &node.node_type,
                    ),
                );
                self.set_state(node_id, NodeState::Error)?;
                self.context.log(
                    LogLevel::Error,
                    format!("failed after {} attempts: {error}", outcome.attempts),
                    Some(node_id),
                );
                self.events.publish(WorkflowEvent::NodeFailed {
                    run_id: self.run_id,
                    node_id: node_id.clone(),
                    error: error.clone(),
                    attempts: outcome.attempts,
                    timestamp: Utc::now(),
                });

                if node.continue_on_error {
                    return Ok(None);
                }
                Ok(Some(RunError::NodeFailed {
                    node_id: node_id.clone(),
                    reason: error.to_string(),
                }))
            }
        }
    }
}

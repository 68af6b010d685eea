//! Built-in node types usable by any pipeline.
//!
//! | type           | parameters                                   |
//! |----------------|----------------------------------------------|
//! | `noop`         | none; passes inputs (or parameters) through  |
//! | `delay`        | `ms`                                         |
//! | `set_variable` | `name` + `value`, or a `variables` object     |
//! | `set_shared`   | `key` + `value`, or a `data` object           |
//! | `log`          | `message`, optional `level`                  |
//! | `condition`    | `condition`, optional `failWhenFalse`        |

use crate::condition::Condition;
use crate::context::ExecutionContext;
use crate::error::{NodeExecutionError, RegistryError};
use crate::node::LogLevel;
use crate::port::{DataKind, Ports};
use crate::registry::{NodeExecutor, NodeInput, NodeRegistry, NodeRegistryBuilder};
use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use std::time::Duration;

pub const NOOP: &str = "noop";
pub const DELAY: &str = "delay";
pub const SET_VARIABLE: &str = "set_variable";
pub const SET_SHARED: &str = "set_shared";
pub const LOG: &str = "log";
pub const CONDITION: &str = "condition";

/// Adds every built-in type to `builder`.
#[must_use]
pub fn register_builtins(builder: NodeRegistryBuilder) -> NodeRegistryBuilder {
    builder
        .register(NOOP, Noop)
        .register(DELAY, Delay)
        .register(SET_VARIABLE, SetVariable)
        .register(SET_SHARED, SetShared)
        .register(LOG, Log)
        .register_with_ports(
            CONDITION,
            Ports::new()
                .input("input", DataKind::Any)
                .output("output", DataKind::Object)
                .output("matched", DataKind::Boolean),
            ConditionCheck,
        )
}

/// Builds a registry holding only the built-in types.
///
/// # Errors
///
/// Returns whatever [`NodeRegistryBuilder::build`] reports.
pub fn builtin_registry() -> Result<NodeRegistry, RegistryError> {
    register_builtins(NodeRegistry::builder()).build()
}

/// Collects `name`/`value` or an object under `bulk` into key/value pairs.
fn assignments(
    input: &NodeInput,
    key: &str,
    bulk: &str,
) -> Result<Vec<(String, JsonValue)>, NodeExecutionError> {
    if let Some(JsonValue::Object(entries)) = input.param(bulk) {
        return Ok(entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect());
    }
    let name = input.require_str(key)?;
    let value = input.param("value").cloned().unwrap_or(JsonValue::Null);
    Ok(vec![(name.to_string(), value)])
}

/// Does nothing and passes its inputs through.
pub struct Noop;

#[async_trait]
impl NodeExecutor for Noop {
    async fn execute(
        &self,
        _context: &ExecutionContext,
        input: &NodeInput,
    ) -> Result<JsonValue, NodeExecutionError> {
        if input.inputs.is_empty() {
            return Ok(input.parameters.clone());
        }
        Ok(json!(input.inputs))
    }
}

/// Sleeps for `ms` milliseconds.
pub struct Delay;

#[async_trait]
impl NodeExecutor for Delay {
    async fn execute(
        &self,
        _context: &ExecutionContext,
        input: &NodeInput,
    ) -> Result<JsonValue, NodeExecutionError> {
        let ms = input.require_u64("ms")?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "delayedMs": ms }))
    }
}

/// Writes run variables.
pub struct SetVariable;

#[async_trait]
impl NodeExecutor for SetVariable {
    async fn execute(
        &self,
        context: &ExecutionContext,
        input: &NodeInput,
    ) -> Result<JsonValue, NodeExecutionError> {
        let mut written = serde_json::Map::new();
        for (name, value) in assignments(input, "name", "variables")? {
            context.set_variable(name.clone(), value.clone());
            written.insert(name, value);
        }
        Ok(JsonValue::Object(written))
    }
}

/// Writes shared scratch data.
pub struct SetShared;

#[async_trait]
impl NodeExecutor for SetShared {
    async fn execute(
        &self,
        context: &ExecutionContext,
        input: &NodeInput,
    ) -> Result<JsonValue, NodeExecutionError> {
        let mut written = serde_json::Map::new();
        for (key, value) in assignments(input, "key", "data")? {
            context.set_shared_data(key.clone(), value.clone());
            written.insert(key, value);
        }
        Ok(JsonValue::Object(written))
    }
}

/// Appends a message to the run log.
pub struct Log;

#[async_trait]
impl NodeExecutor for Log {
    async fn execute(
        &self,
        context: &ExecutionContext,
        input: &NodeInput,
    ) -> Result<JsonValue, NodeExecutionError> {
        let message = input.require_str("message")?;
        let level = match input.param("level") {
            Some(level) => serde_json::from_value::<LogLevel>(level.clone())
                .map_err(|e| NodeExecutionError::invalid_input(format!("level: {e}")))?,
            None => LogLevel::Info,
        };
        context.log(level, message, Some(&input.node_id));
        Ok(json!({ "message": message }))
    }
}

/// Evaluates a condition against the context.
pub struct ConditionCheck;

#[async_trait]
impl NodeExecutor for ConditionCheck {
    async fn execute(
        &self,
        context: &ExecutionContext,
        input: &NodeInput,
    ) -> Result<JsonValue, NodeExecutionError> {
        let source = input.require_str("condition")?;
        let condition: Condition = source
            .parse()
            .map_err(|e| NodeExecutionError::invalid_input(format!("{e}")))?;
        let matched = condition.evaluate(context);

        let fail_when_false = input
            .param("failWhenFalse")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false);
        if !matched && fail_when_false {
            return Err(NodeExecutionError::failed(format!(
                "condition not met: {source}"
            )));
        }
        Ok(json!({ "matched": matched, "condition": source }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::node::NodeId;
    use crate::template::Variables;
    use nodeflow_core::RunId;
    use std::collections::HashMap;

    fn context() -> ExecutionContext {
        ExecutionContext::new(RunId::new(), Variables::new(), EventBus::new())
    }

    fn input(node_type: &str, parameters: JsonValue) -> NodeInput {
        NodeInput {
            node_id: NodeId::from("n"),
            node_type: node_type.to_string(),
            attempt: 1,
            parameters,
            inputs: HashMap::new(),
        }
    }

    async fn run(
        node_type: &str,
        ctx: &ExecutionContext,
        parameters: JsonValue,
    ) -> Result<JsonValue, NodeExecutionError> {
        let registry = builtin_registry().expect("builtins");
        let executor = registry.executor(node_type).expect("registered");
        executor.execute(ctx, &input(node_type, parameters)).await
    }

    #[tokio::test]
    async fn set_variable_single_and_bulk() {
        let ctx = context();
        run(SET_VARIABLE, &ctx, json!({ "name": "page", "value": 2 }))
            .await
            .expect("single");
        run(SET_VARIABLE, &ctx, json!({ "variables": { "a": "x", "b": true } }))
            .await
            .expect("bulk");

        assert_eq!(ctx.get_variable("page"), Some(json!(2)));
        assert_eq!(ctx.get_variable("b"), Some(json!(true)));
    }

    #[tokio::test]
    async fn set_shared_writes_scratch_data() {
        let ctx = context();
        let output = run(SET_SHARED, &ctx, json!({ "key": "cookie", "value": "abc" }))
            .await
            .expect("set");
        assert_eq!(output, json!({ "cookie": "abc" }));
        assert_eq!(ctx.get_shared_data("cookie"), Some(json!("abc")));
        assert!(!ctx.has_variable("cookie"));
    }

    #[tokio::test]
    async fn set_variable_requires_a_name() {
        let err = run(SET_VARIABLE, &context(), json!({ "value": 1 }))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeExecutionError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn log_appends_to_context() {
        let ctx = context();
        run(LOG, &ctx, json!({ "message": "hello", "level": "warn" }))
            .await
            .expect("log");

        let logs = ctx.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Warn);
        assert_eq!(logs[0].node_id, Some(NodeId::from("n")));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_sleeps() {
        let start = tokio::time::Instant::now();
        run(DELAY, &context(), json!({ "ms": "1500" }))
            .await
            .expect("delay");
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn condition_reports_and_optionally_fails() {
        let ctx = context();
        ctx.set_variable("count", json!(3));

        let output = run(CONDITION, &ctx, json!({ "condition": "variables.count gt 2" }))
            .await
            .expect("evaluate");
        assert_eq!(output["matched"], json!(true));

        let err = run(
            CONDITION,
            &ctx,
            json!({ "condition": "variables.count gt 5", "failWhenFalse": true }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, NodeExecutionError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn noop_passes_inputs_through() {
        let registry = builtin_registry().expect("builtins");
        let executor = registry.executor(NOOP).expect("registered");
        let mut node_input = input(NOOP, json!({}));
        node_input.inputs.insert("input".to_string(), json!([1, 2]));

        let output = executor.execute(&context(), &node_input).await.expect("noop");
        assert_eq!(output, json!({ "input": [1, 2] }));
    }
}

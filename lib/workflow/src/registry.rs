//! Node type registry.
//!
//! Maps a node's declared `type` to the [`NodeExecutor`] that runs it and to
//! the type's declared ports. A registry is populated once through
//! [`NodeRegistryBuilder`] and is read-only afterwards.

use crate::context::ExecutionContext;
use crate::error::{NodeExecutionError, RegistryError};
use crate::node::NodeId;
use crate::port::{PortCatalog, Ports};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Everything an executor receives for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInput {
    pub node_id: NodeId,
    pub node_type: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Parameters with `${name}` tokens already resolved.
    pub parameters: JsonValue,
    /// Upstream values keyed by input port name.
    pub inputs: HashMap<String, JsonValue>,
}

impl NodeInput {
    /// Returns a parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&JsonValue> {
        self.parameters.get(name)
    }

    /// Returns a string parameter.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the parameter is missing or not a string.
    pub fn require_str(&self, name: &str) -> Result<&str, NodeExecutionError> {
        self.param(name).and_then(JsonValue::as_str).ok_or_else(|| {
            NodeExecutionError::invalid_input(format!("parameter '{name}' must be a string"))
        })
    }

    /// Returns an unsigned integer parameter. Numeric strings are accepted,
    /// since resolved templates always produce strings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the parameter is missing or not a number.
    pub fn require_u64(&self, name: &str) -> Result<u64, NodeExecutionError> {
        match self.param(name) {
            Some(JsonValue::Number(n)) => n.as_u64(),
            Some(JsonValue::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| {
            NodeExecutionError::invalid_input(format!(
                "parameter '{name}' must be a non-negative integer"
            ))
        })
    }
}

/// Runs one kind of node.
///
/// Executors may read and write the context; they must not assume anything
/// about other nodes running in the same round.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Executes one attempt of a node.
    async fn execute(
        &self,
        context: &ExecutionContext,
        input: &NodeInput,
    ) -> Result<JsonValue, NodeExecutionError>;
}

/// Adapts an async closure into a [`NodeExecutor`].
pub struct FnExecutor<F>(F);

#[async_trait]
impl<F, Fut> NodeExecutor for FnExecutor<F>
where
    F: Fn(ExecutionContext, NodeInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JsonValue, NodeExecutionError>> + Send,
{
    async fn execute(
        &self,
        context: &ExecutionContext,
        input: &NodeInput,
    ) -> Result<JsonValue, NodeExecutionError> {
        (self.0)(context.clone(), input.clone()).await
    }
}

/// Wraps an async closure as an executor.
pub fn from_fn<F, Fut>(f: F) -> FnExecutor<F>
where
    F: Fn(ExecutionContext, NodeInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JsonValue, NodeExecutionError>> + Send,
{
    FnExecutor(f)
}

struct Registration {
    executor: Arc<dyn NodeExecutor>,
    ports: Option<Ports>,
}

/// Read-only map from node type to executor and ports.
pub struct NodeRegistry {
    types: HashMap<String, Registration>,
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("types", &self.types())
            .finish()
    }
}

impl NodeRegistry {
    /// Starts building a registry.
    #[must_use]
    pub fn builder() -> NodeRegistryBuilder {
        NodeRegistryBuilder::default()
    }

    /// Returns the executor for `node_type`.
    #[must_use]
    pub fn executor(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.types
            .get(node_type)
            .map(|registration| Arc::clone(&registration.executor))
    }

    #[must_use]
    pub fn contains(&self, node_type: &str) -> bool {
        self.types.contains_key(node_type)
    }

    /// Returns the registered type names, sorted.
    #[must_use]
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<_> = self.types.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl PortCatalog for NodeRegistry {
    fn ports(&self, node_type: &str) -> Option<&Ports> {
        self.types.get(node_type)?.ports.as_ref()
    }
}

/// Collects registrations; duplicates are reported by [`build`](Self::build).
#[derive(Default)]
pub struct NodeRegistryBuilder {
    types: HashMap<String, Registration>,
    duplicate: Option<String>,
}

impl NodeRegistryBuilder {
    fn insert(mut self, node_type: String, registration: Registration) -> Self {
        if self.types.contains_key(&node_type) {
            self.duplicate.get_or_insert(node_type);
        } else {
            self.types.insert(node_type, registration);
        }
        self
    }

    /// Registers an executor for a type that declares no ports.
    #[must_use]
    pub fn register<E>(self, node_type: impl Into<String>, executor: E) -> Self
    where
        E: NodeExecutor + 'static,
    {
        self.insert(
            node_type.into(),
            Registration {
                executor: Arc::new(executor),
                ports: None,
            },
        )
    }

    /// Registers an executor together with its declared ports.
    #[must_use]
    pub fn register_with_ports<E>(
        self,
        node_type: impl Into<String>,
        ports: Ports,
        executor: E,
    ) -> Self
    where
        E: NodeExecutor + 'static,
    {
        self.insert(
            node_type.into(),
            Registration {
                executor: Arc::new(executor),
                ports: Some(ports),
            },
        )
    }

    /// Registers an async closure.
    #[must_use]
    pub fn register_fn<F, Fut>(self, node_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(ExecutionContext, NodeInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JsonValue, NodeExecutionError>> + Send + 'static,
    {
        self.register(node_type, from_fn(f))
    }

    /// Finishes the registry.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateType` naming the first type registered twice.
    pub fn build(self) -> Result<NodeRegistry, RegistryError> {
        if let Some(node_type) = self.duplicate {
            return Err(RegistryError::DuplicateType { node_type });
        }
        Ok(NodeRegistry { types: self.types })
    }
}

//! Workflow definition documents.
//!
//! A definition is the JSON form of a workflow:
//! - Optional metadata (name, description, version)
//! - Nodes and the connections between them
//! - Initial variables for each run
//!
//! [`WorkflowDefinition::from_json_str`] checks the document's shape. When the
//! shape is wrong, structural problems among the well-formed entries are
//! reported alongside. Full structural checks (ids, endpoints, ports, cycles)
//! run when a definition is turned into a [`Workflow`].

use crate::edge::Connection;
use crate::error::{DefinitionError, ValidationError};
use crate::graph::{WorkflowGraph, check_structure};
use crate::node::{Node, NodeState};
use crate::port::{NoPorts, PortCatalog};
use crate::template::Variables;
use nodeflow_core::WorkflowId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;

/// The JSON document describing a workflow.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub variables: Variables,
}

fn field<T: DeserializeOwned>(
    value: JsonValue,
    location: String,
    errors: &mut Vec<ValidationError>,
) -> Option<T> {
    serde_json::from_value(value)
        .map_err(|e| {
            errors.push(ValidationError::MalformedEntry {
                location,
                reason: e.to_string(),
            });
        })
        .ok()
}

fn entries<T: DeserializeOwned>(
    document: &mut serde_json::Map<String, JsonValue>,
    key: &str,
    errors: &mut Vec<ValidationError>,
) -> Vec<T> {
    match document.remove(key) {
        None => {
            errors.push(ValidationError::MissingField {
                field: key.to_string(),
            });
            Vec::new()
        }
        Some(JsonValue::Array(items)) => items
            .into_iter()
            .enumerate()
            .filter_map(|(i, item)| field(item, format!("{key}[{i}]"), errors))
            .collect(),
        Some(_) => {
            errors.push(ValidationError::MalformedEntry {
                location: key.to_string(),
                reason: "expected an array".to_string(),
            });
            Vec::new()
        }
    }
}

/// Ids of every node entry that names one, well-formed or not.
fn declared_node_ids(document: &serde_json::Map<String, JsonValue>) -> HashSet<String> {
    document
        .get("nodes")
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.get("id").and_then(JsonValue::as_str))
        .map(str::to_string)
        .collect()
}

impl WorkflowDefinition {
    /// Parses a definition from JSON text.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` for invalid JSON and `Invalid` with every shape
    /// problem found otherwise.
    pub fn from_json_str(text: &str) -> Result<Self, DefinitionError> {
        let value: JsonValue =
            serde_json::from_str(text).map_err(|e| DefinitionError::Syntax {
                line: e.line(),
                column: e.column(),
                reason: e.to_string(),
            })?;
        Self::from_value(value)
    }

    /// Builds a definition from an already parsed JSON value.
    ///
    /// Every entry is checked, so one call reports all malformed nodes and
    /// connections at once.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` listing `MissingField` and `MalformedEntry` errors.
    pub fn from_value(value: JsonValue) -> Result<Self, DefinitionError> {
        let JsonValue::Object(mut document) = value else {
            return Err(DefinitionError::Invalid {
                errors: vec![ValidationError::MalformedEntry {
                    location: "$".to_string(),
                    reason: "expected an object".to_string(),
                }],
            });
        };

        let mut errors = Vec::new();
        let declared_ids = declared_node_ids(&document);
        let nodes = entries(&mut document, "nodes", &mut errors);
        let connections = entries(&mut document, "connections", &mut errors);

        let mut text = |key: &str, errors: &mut Vec<ValidationError>| {
            document
                .remove(key)
                .filter(|v| !v.is_null())
                .and_then(|v| field::<String>(v, key.to_string(), errors))
        };
        let name = text("name", &mut errors);
        let description = text("description", &mut errors);
        let version = text("version", &mut errors);

        let variables = match document.remove("variables") {
            None | Some(JsonValue::Null) => Variables::new(),
            Some(JsonValue::Object(map)) => map,
            Some(_) => {
                errors.push(ValidationError::MalformedEntry {
                    location: "variables".to_string(),
                    reason: "expected an object".to_string(),
                });
                Variables::new()
            }
        };

        if !errors.is_empty() {
            // Report structural problems among the entries that did parse,
            // except endpoints that exist but were malformed.
            errors.extend(
                check_structure(&nodes, &connections, &NoPorts)
                    .into_iter()
                    .filter(|error| match error {
                        ValidationError::DanglingConnection { missing, .. } => {
                            !declared_ids.contains(missing.as_str())
                        }
                        _ => true,
                    }),
            );
            return Err(DefinitionError::Invalid { errors });
        }

        Ok(Self {
            name,
            description,
            version,
            nodes,
            connections,
            variables,
        })
    }

    /// Serializes the definition as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Checks the definition's structure against `catalog`.
    #[must_use]
    pub fn validate(&self, catalog: &dyn PortCatalog) -> Vec<ValidationError> {
        check_structure(&self.nodes, &self.connections, catalog)
    }
}

/// Descriptive metadata carried by a loaded workflow.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
}

/// A validated workflow ready to run.
#[derive(Debug, Clone)]
pub struct Workflow {
    id: WorkflowId,
    metadata: WorkflowMetadata,
    graph: WorkflowGraph,
    variables: Variables,
}

impl Workflow {
    /// Validates `definition` and builds its graph.
    ///
    /// # Errors
    ///
    /// Returns every structural problem found.
    pub fn from_definition(
        definition: WorkflowDefinition,
        catalog: &dyn PortCatalog,
    ) -> Result<Self, Vec<ValidationError>> {
        let graph = WorkflowGraph::from_parts(definition.nodes, definition.connections, catalog)?;
        Ok(Self {
            id: WorkflowId::new(),
            metadata: WorkflowMetadata {
                name: definition.name,
                description: definition.description,
                version: definition.version,
            },
            graph,
            variables: definition.variables,
        })
    }

    #[must_use]
    pub fn id(&self) -> WorkflowId {
        self.id
    }

    #[must_use]
    pub fn metadata(&self) -> &WorkflowMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub(crate) fn graph_mut(&mut self) -> &mut WorkflowGraph {
        &mut self.graph
    }

    /// Initial variables for each run.
    #[must_use]
    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Converts back into a definition document.
    #[must_use]
    pub fn to_definition(&self) -> WorkflowDefinition {
        WorkflowDefinition {
            name: self.metadata.name.clone(),
            description: self.metadata.description.clone(),
            version: self.metadata.version.clone(),
            nodes: self
                .graph
                .nodes()
                .map(|node| {
                    let mut node = node.clone();
                    node.set_state(NodeState::Idle);
                    node
                })
                .collect(),
            connections: self.graph.connections().cloned().collect(),
            variables: self.variables.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use serde_json::json;

    const LOGIN_FLOW: &str = r#"{
        "name": "login",
        "version": "1",
        "nodes": [
            { "id": "open", "type": "noop", "parameters": { "url": "${base}" } },
            { "id": "submit", "type": "noop", "retry": {
                "maxAttempts": 3, "initialDelayMs": 100,
                "backoffMultiplier": 2.0, "maxDelayMs": 1000 } }
        ],
        "connections": [
            { "from": "open", "fromOutput": "output", "to": "submit", "toInput": "input" }
        ],
        "variables": { "base": "https://example.test" }
    }"#;

    #[test]
    fn parses_complete_document() {
        let definition = WorkflowDefinition::from_json_str(LOGIN_FLOW).expect("parse");
        assert_eq!(definition.name.as_deref(), Some("login"));
        assert_eq!(definition.nodes.len(), 2);
        assert_eq!(definition.connections.len(), 1);
        assert_eq!(
            definition.nodes[1].retry.map(|r| r.max_attempts),
            Some(3)
        );
        assert!(definition.validate(&NoPorts).is_empty());
    }

    #[test]
    fn reports_all_shape_errors() {
        let err = WorkflowDefinition::from_value(json!({
            "nodes": [ { "id": "a" }, { "id": "b", "type": "noop" }, 7 ],
            "variables": []
        }))
        .unwrap_err();

        let DefinitionError::Invalid { errors } = err else {
            panic!("expected shape errors");
        };
        let locations: Vec<_> = errors
            .iter()
            .map(|e| match e {
                ValidationError::MalformedEntry { location, .. } => location.clone(),
                ValidationError::MissingField { field } => format!("missing {field}"),
                other => other.to_string(),
            })
            .collect();
        assert_eq!(
            locations,
            vec!["nodes[0]", "nodes[2]", "missing connections", "variables"]
        );
    }

    #[test]
    fn shape_and_structure_errors_arrive_together() {
        let err = WorkflowDefinition::from_value(json!({
            "nodes": [
                { "id": "a", "type": "noop" },
                { "id": "a", "type": "noop" },
                { "id": "b" }
            ],
            "connections": [
                { "from": "a", "to": "ghost" },
                { "from": "a", "to": "b" }
            ]
        }))
        .unwrap_err();

        let DefinitionError::Invalid { errors } = err else {
            panic!("expected batched errors");
        };
        assert_eq!(errors.len(), 3, "{errors:?}");
        assert!(matches!(
            &errors[0],
            ValidationError::MalformedEntry { location, .. } if location == "nodes[2]"
        ));
        assert_eq!(
            errors[1],
            ValidationError::DuplicateNodeId {
                node_id: NodeId::from("a")
            }
        );
        assert_eq!(
            errors[2],
            ValidationError::DanglingConnection {
                from: NodeId::from("a"),
                to: NodeId::from("ghost"),
                missing: NodeId::from("ghost"),
            }
        );
    }

    #[test]
    fn syntax_errors_carry_position() {
        let err = WorkflowDefinition::from_json_str("{\n  \"nodes\": [,]\n}").unwrap_err();
        assert!(matches!(err, DefinitionError::Syntax { line: 2, .. }));
    }

    #[test]
    fn non_object_document_is_rejected() {
        assert!(matches!(
            WorkflowDefinition::from_value(json!([1, 2])),
            Err(DefinitionError::Invalid { .. })
        ));
    }

    #[test]
    fn workflow_round_trips_to_definition() {
        let definition = WorkflowDefinition::from_json_str(LOGIN_FLOW).expect("parse");
        let workflow = Workflow::from_definition(definition.clone(), &NoPorts).expect("valid");
        assert_eq!(workflow.to_definition(), definition);
    }

    #[test]
    fn structural_errors_surface_when_building() {
        let definition = WorkflowDefinition {
            nodes: vec![Node::new("a", "noop"), Node::new("a", "noop")],
            connections: vec![Connection::between("a", "z")],
            ..WorkflowDefinition::default()
        };
        let errors = Workflow::from_definition(definition, &NoPorts).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}

//! Workflow graph implementation using petgraph.
//!
//! Workflows are directed acyclic graphs where:
//! - Nodes are units of work keyed by [`NodeId`]
//! - Edges are [`Connection`]s from an upstream output to a downstream input
//!
//! The graph also owns each node's per-run [`NodeState`], which the engine
//! advances between rounds.

use crate::condition::Condition;
use crate::edge::Connection;
use crate::error::{GraphError, ValidationError};
use crate::node::{Node, NodeId, NodeState};
use crate::port::{NoPorts, PortCatalog, PortDirection};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, DfsEvent, EdgeRef, depth_first_search};
use std::collections::{HashMap, HashSet};

/// A workflow graph using petgraph's directed graph.
#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    /// The underlying directed graph.
    graph: DiGraph<Node, Connection>,
    /// Map from NodeId to petgraph's NodeIndex for O(1) lookup.
    node_index_map: HashMap<NodeId, NodeIndex>,
}

impl WorkflowGraph {
    /// Creates a new empty workflow graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from nodes and connections, validating the whole set
    /// first.
    ///
    /// # Errors
    ///
    /// Returns every problem found by [`check_structure`].
    pub fn from_parts(
        nodes: Vec<Node>,
        connections: Vec<Connection>,
        catalog: &dyn PortCatalog,
    ) -> Result<Self, Vec<ValidationError>> {
        let errors = check_structure(&nodes, &connections, catalog);
        if !errors.is_empty() {
            return Err(errors);
        }

        let mut graph = Self::new();
        for node in nodes {
            graph.add_node(node).map_err(|e| vec![e])?;
        }
        for connection in connections {
            graph.add_connection(connection).map_err(|e| vec![e])?;
        }
        Ok(graph)
    }

    /// Adds a node to the graph.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateNodeId` if a node with the same id exists.
    pub fn add_node(&mut self, node: Node) -> Result<NodeId, ValidationError> {
        if self.node_index_map.contains_key(&node.id) {
            return Err(ValidationError::DuplicateNodeId { node_id: node.id });
        }
        let node_id = node.id.clone();
        let index = self.graph.add_node(node);
        self.node_index_map.insert(node_id.clone(), index);
        Ok(node_id)
    }

    /// Adds a connection without consulting port declarations.
    ///
    /// # Errors
    ///
    /// Returns `DanglingConnection` if either endpoint is unknown.
    pub fn add_connection(&mut self, connection: Connection) -> Result<(), ValidationError> {
        self.add_connection_with(connection, &NoPorts)
    }

    /// Adds a connection, checking it against the declared ports in `catalog`.
    ///
    /// # Errors
    ///
    /// Returns `DanglingConnection` if either endpoint is unknown, or
    /// `UnknownPort`/`IncompatibleConnection` if the ports do not line up.
    pub fn add_connection_with(
        &mut self,
        connection: Connection,
        catalog: &dyn PortCatalog,
    ) -> Result<(), ValidationError> {
        let (from, to) = self.endpoints(&connection)?;

        let from_type = &self.graph[from].node_type;
        let to_type = &self.graph[to].node_type;
        if let Some(error) = port_error(&connection, from_type, to_type, catalog) {
            return Err(error);
        }

        self.graph.add_edge(from, to, connection);
        Ok(())
    }

    fn endpoints(&self, connection: &Connection) -> Result<(NodeIndex, NodeIndex), ValidationError> {
        let lookup = |id: &NodeId| {
            self.node_index_map
                .get(id)
                .copied()
                .ok_or_else(|| ValidationError::DanglingConnection {
                    from: connection.from.clone(),
                    to: connection.to.clone(),
                    missing: id.clone(),
                })
        };
        Ok((lookup(&connection.from)?, lookup(&connection.to)?))
    }

    /// Returns a reference to a node by its ID.
    #[must_use]
    pub fn get_node(&self, node_id: &str) -> Option<&Node> {
        let index = self.node_index_map.get(node_id)?;
        self.graph.node_weight(*index)
    }

    /// Returns true if the graph contains the node.
    #[must_use]
    pub fn contains(&self, node_id: &str) -> bool {
        self.node_index_map.contains_key(node_id)
    }

    /// Returns all nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Returns all connections in declaration order.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.graph.edge_weights()
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of connections in the graph.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns nodes that have no incoming connections.
    pub fn entry_nodes(&self) -> Vec<&Node> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .edges_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|idx| &self.graph[idx])
            .collect()
    }

    /// Returns the distinct upstream nodes of `node_id`.
    #[must_use]
    pub fn dependencies(&self, node_id: &str) -> Vec<NodeId> {
        self.neighbors(node_id, Direction::Incoming)
    }

    /// Returns the distinct downstream nodes of `node_id`.
    #[must_use]
    pub fn dependents(&self, node_id: &str) -> Vec<NodeId> {
        self.neighbors(node_id, Direction::Outgoing)
    }

    fn neighbors(&self, node_id: &str, direction: Direction) -> Vec<NodeId> {
        let Some(&index) = self.node_index_map.get(node_id) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut ids: Vec<_> = self
            .graph
            .edges_directed(index, direction)
            .map(|edge| match direction {
                Direction::Incoming => edge.source(),
                Direction::Outgoing => edge.target(),
            })
            .filter(|idx| seen.insert(*idx))
            .collect();
        ids.sort();
        ids.into_iter().map(|idx| self.graph[idx].id.clone()).collect()
    }

    /// Returns the connections arriving at `node_id` in declaration order.
    #[must_use]
    pub fn incoming(&self, node_id: &str) -> Vec<&Connection> {
        let Some(&index) = self.node_index_map.get(node_id) else {
            return Vec::new();
        };

        let mut edges: Vec<_> = self
            .graph
            .edges_directed(index, Direction::Incoming)
            .map(|edge| edge.id())
            .collect();
        edges.sort();
        edges.into_iter().map(|edge| &self.graph[edge]).collect()
    }

    /// Validates the graph without port declarations.
    ///
    /// Calling this repeatedly on the same graph yields identical results.
    #[must_use]
    pub fn validate(&self) -> Vec<ValidationError> {
        self.validate_with(&NoPorts)
    }

    /// Validates the graph against the declared ports in `catalog`.
    #[must_use]
    pub fn validate_with(&self, catalog: &dyn PortCatalog) -> Vec<ValidationError> {
        let nodes: Vec<Node> = self.nodes().cloned().collect();
        let connections: Vec<Connection> = self.connections().cloned().collect();
        check_structure(&nodes, &connections, catalog)
    }

    /// Returns the ids of nodes that are idle and whose dependencies have all
    /// completed, in declaration order.
    ///
    /// Nodes missing from `states` are treated as idle.
    #[must_use]
    pub fn ready_nodes(&self, states: &HashMap<NodeId, NodeState>) -> Vec<NodeId> {
        let state_of = |idx: NodeIndex| {
            states
                .get(&self.graph[idx].id)
                .copied()
                .unwrap_or_default()
        };

        self.graph
            .node_indices()
            .filter(|&idx| state_of(idx) == NodeState::Idle)
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .all(|dep| state_of(dep) == NodeState::Completed)
            })
            .map(|idx| self.graph[idx].id.clone())
            .collect()
    }

    /// Returns the ids of idle nodes that can never become ready because a
    /// transitive dependency ended in `error` or `skipped`.
    #[must_use]
    pub fn blocked_nodes(&self, states: &HashMap<NodeId, NodeState>) -> Vec<NodeId> {
        let state_of = |idx: NodeIndex| {
            states
                .get(&self.graph[idx].id)
                .copied()
                .unwrap_or_default()
        };

        let mut blocked = HashSet::new();
        for root in self.graph.node_indices() {
            if !state_of(root).blocks_downstream() {
                continue;
            }
            let mut dfs = Dfs::new(&self.graph, root);
            while let Some(idx) = dfs.next(&self.graph) {
                if idx != root && state_of(idx) == NodeState::Idle {
                    blocked.insert(idx);
                }
            }
        }

        let mut blocked: Vec<_> = blocked.into_iter().collect();
        blocked.sort();
        blocked
            .into_iter()
            .map(|idx| self.graph[idx].id.clone())
            .collect()
    }

    /// Returns the current state of every node.
    #[must_use]
    pub fn node_states(&self) -> HashMap<NodeId, NodeState> {
        self.nodes()
            .map(|node| (node.id.clone(), node.state()))
            .collect()
    }

    /// Moves a node to a new state.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` for unknown ids and `InvalidTransition` when the
    /// change would move the node backwards.
    pub fn set_node_state(&mut self, node_id: &str, state: NodeState) -> Result<(), GraphError> {
        let index = self
            .node_index_map
            .get(node_id)
            .copied()
            .ok_or_else(|| GraphError::NodeNotFound {
                node_id: NodeId::from(node_id),
            })?;
        let node = &mut self.graph[index];
        if !node.state().can_transition_to(state) {
            return Err(GraphError::InvalidTransition {
                node_id: node.id.clone(),
                from: node.state(),
                to: state,
            });
        }
        node.set_state(state);
        Ok(())
    }

    /// Puts every node back to idle for a fresh run.
    pub fn reset_states(&mut self) {
        for node in self.graph.node_weights_mut() {
            node.set_state(NodeState::Idle);
        }
    }
}

/// Checks a set of nodes and connections for structural problems.
///
/// Errors are reported in a fixed order: duplicate ids, dangling connections,
/// port problems, cycles, then unparsable run conditions. Within each group
/// they follow declaration order.
#[must_use]
pub fn check_structure(
    nodes: &[Node],
    connections: &[Connection],
    catalog: &dyn PortCatalog,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut types: HashMap<&NodeId, &str> = HashMap::new();
    let mut reported = HashSet::new();
    for node in nodes {
        if types.contains_key(&node.id) {
            if reported.insert(&node.id) {
                errors.push(ValidationError::DuplicateNodeId {
                    node_id: node.id.clone(),
                });
            }
        } else {
            types.insert(&node.id, &node.node_type);
        }
    }

    let mut resolved = Vec::new();
    for connection in connections {
        let mut dangling = false;
        for endpoint in [&connection.from, &connection.to] {
            if !types.contains_key(endpoint) {
                dangling = true;
                errors.push(ValidationError::DanglingConnection {
                    from: connection.from.clone(),
                    to: connection.to.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
        if !dangling {
            resolved.push(connection);
        }
    }

    for connection in &resolved {
        let from_type = types[&connection.from];
        let to_type = types[&connection.to];
        if let Some(error) = port_error(connection, from_type, to_type, catalog) {
            errors.push(error);
        }
    }

    errors.extend(cycle_errors(nodes, &resolved));

    for node in nodes {
        if let Some(condition) = &node.condition
            && let Err(e) = condition.parse::<Condition>()
        {
            errors.push(ValidationError::InvalidCondition {
                node_id: node.id.clone(),
                reason: e.to_string(),
            });
        }
    }

    errors
}

fn port_error(
    connection: &Connection,
    from_type: &str,
    to_type: &str,
    catalog: &dyn PortCatalog,
) -> Option<ValidationError> {
    let output = match catalog.ports(from_type) {
        Some(ports) => match ports.find(PortDirection::Output, &connection.from_output) {
            Some(port) => Some(port.kind),
            None => {
                return Some(ValidationError::UnknownPort {
                    node_id: connection.from.clone(),
                    port: connection.from_output.clone(),
                    direction: PortDirection::Output,
                });
            }
        },
        None => None,
    };
    let input = match catalog.ports(to_type) {
        Some(ports) => match ports.find(PortDirection::Input, &connection.to_input) {
            Some(port) => Some(port.kind),
            None => {
                return Some(ValidationError::UnknownPort {
                    node_id: connection.to.clone(),
                    port: connection.to_input.clone(),
                    direction: PortDirection::Input,
                });
            }
        },
        None => None,
    };

    match (output, input) {
        (Some(output_kind), Some(input_kind)) if !output_kind.is_compatible_with(input_kind) => {
            Some(ValidationError::IncompatibleConnection {
                from: connection.from.clone(),
                from_output: connection.from_output.clone(),
                to: connection.to.clone(),
                to_input: connection.to_input.clone(),
                output_kind,
                input_kind,
            })
        }
        _ => None,
    }
}

/// Runs a depth-first search from every node in declaration order and
/// reports each node that is reached again while still on the DFS stack.
fn cycle_errors(nodes: &[Node], connections: &[&Connection]) -> Vec<ValidationError> {
    let mut graph: DiGraph<&NodeId, ()> = DiGraph::new();
    let mut indices = HashMap::new();
    for node in nodes {
        indices
            .entry(&node.id)
            .or_insert_with(|| graph.add_node(&node.id));
    }
    for connection in connections {
        if let (Some(&from), Some(&to)) = (indices.get(&connection.from), indices.get(&connection.to))
        {
            graph.add_edge(from, to, ());
        }
    }

    let mut seen = HashSet::new();
    let mut errors = Vec::new();
    depth_first_search(&graph, graph.node_indices(), |event| {
        if let DfsEvent::BackEdge(_, revisited) = event
            && seen.insert(revisited)
        {
            errors.push(ValidationError::CyclicDependency {
                node_id: graph[revisited].clone(),
            });
        }
    });
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{DataKind, Ports};

    fn chain(ids: &[&str]) -> WorkflowGraph {
        let mut graph = WorkflowGraph::new();
        for id in ids {
            graph.add_node(Node::new(*id, "noop")).expect("add node");
        }
        for pair in ids.windows(2) {
            graph
                .add_connection(Connection::between(pair[0], pair[1]))
                .expect("add connection");
        }
        graph
    }

    fn ids(ids: &[&str]) -> Vec<NodeId> {
        ids.iter().map(|id| NodeId::from(*id)).collect()
    }

    struct Catalog(HashMap<String, Ports>);

    impl PortCatalog for Catalog {
        fn ports(&self, node_type: &str) -> Option<&Ports> {
            self.0.get(node_type)
        }
    }

    #[test]
    fn add_node_rejects_duplicates() {
        let mut graph = WorkflowGraph::new();
        graph.add_node(Node::new("a", "noop")).expect("first add");
        let err = graph.add_node(Node::new("a", "delay")).unwrap_err();
        assert_eq!(
            err,
            ValidationError::DuplicateNodeId {
                node_id: NodeId::from("a")
            }
        );
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn add_connection_rejects_unknown_endpoint() {
        let mut graph = chain(&["a"]);
        let err = graph
            .add_connection(Connection::between("a", "ghost"))
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::DanglingConnection { ref missing, .. } if missing.as_str() == "ghost"
        ));
    }

    #[test]
    fn add_connection_checks_port_kinds() {
        let catalog = Catalog(HashMap::from([
            (
                "count".to_string(),
                Ports::new().output("output", DataKind::Number),
            ),
            (
                "greet".to_string(),
                Ports::new().input("input", DataKind::String),
            ),
        ]));
        let mut graph = WorkflowGraph::new();
        graph.add_node(Node::new("n", "count")).expect("add");
        graph.add_node(Node::new("g", "greet")).expect("add");

        let err = graph
            .add_connection_with(Connection::between("n", "g"), &catalog)
            .unwrap_err();
        assert!(matches!(err, ValidationError::IncompatibleConnection { .. }));

        let err = graph
            .add_connection_with(Connection::new("n", "total", "g", "input"), &catalog)
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::UnknownPort {
                direction: PortDirection::Output,
                ..
            }
        ));
    }

    #[test]
    fn ready_nodes_require_completed_dependencies() {
        let mut graph = chain(&["a", "b", "c"]);
        assert_eq!(graph.ready_nodes(&graph.node_states()), ids(&["a"]));

        graph.set_node_state("a", NodeState::Running).expect("run a");
        assert!(graph.ready_nodes(&graph.node_states()).is_empty());

        graph.set_node_state("a", NodeState::Completed).expect("complete a");
        assert_eq!(graph.ready_nodes(&graph.node_states()), ids(&["b"]));
    }

    #[test]
    fn missing_states_count_as_idle() {
        let graph = chain(&["a", "b"]);
        assert_eq!(graph.ready_nodes(&HashMap::new()), ids(&["a"]));
    }

    #[test]
    fn validate_reports_two_node_cycle() {
        let mut graph = chain(&["a", "b"]);
        graph
            .add_connection(Connection::between("b", "a"))
            .expect("add back edge");

        let errors = graph.validate();
        assert_eq!(
            errors,
            vec![ValidationError::CyclicDependency {
                node_id: NodeId::from("a")
            }]
        );
    }

    #[test]
    fn validate_is_deterministic() {
        let mut graph = chain(&["a", "b", "c"]);
        graph
            .add_connection(Connection::between("c", "a"))
            .expect("add back edge");
        graph
            .add_node(Node::new("d", "noop").with_condition("variables.x maybe 3"))
            .expect("add d");

        let first = graph.validate();
        assert_eq!(first.len(), 2);
        assert_eq!(first, graph.validate());
    }

    #[test]
    fn check_structure_orders_error_groups() {
        let nodes = vec![
            Node::new("a", "noop"),
            Node::new("b", "noop"),
            Node::new("a", "noop"),
        ];
        let connections = vec![
            Connection::between("a", "b"),
            Connection::between("b", "a"),
            Connection::between("b", "missing"),
        ];

        let errors = check_structure(&nodes, &connections, &NoPorts);
        assert_eq!(
            errors,
            vec![
                ValidationError::DuplicateNodeId {
                    node_id: NodeId::from("a")
                },
                ValidationError::DanglingConnection {
                    from: NodeId::from("b"),
                    to: NodeId::from("missing"),
                    missing: NodeId::from("missing"),
                },
                ValidationError::CyclicDependency {
                    node_id: NodeId::from("a")
                },
            ]
        );
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let nodes = vec![Node::new("a", "noop")];
        let connections = vec![Connection::between("a", "a")];
        assert_eq!(
            check_structure(&nodes, &connections, &NoPorts),
            vec![ValidationError::CyclicDependency {
                node_id: NodeId::from("a")
            }]
        );
    }

    #[test]
    fn blocked_nodes_follow_failed_dependencies() {
        let mut graph = chain(&["a", "b", "c"]);
        graph.add_node(Node::new("d", "noop")).expect("add d");
        graph.set_node_state("a", NodeState::Running).expect("run a");
        graph.set_node_state("a", NodeState::Error).expect("fail a");

        let states = graph.node_states();
        assert_eq!(graph.blocked_nodes(&states), ids(&["b", "c"]));
        assert_eq!(graph.ready_nodes(&states), ids(&["d"]));
    }

    #[test]
    fn set_node_state_rejects_backward_moves() {
        let mut graph = chain(&["a"]);
        graph.set_node_state("a", NodeState::Running).expect("run");
        graph.set_node_state("a", NodeState::Completed).expect("complete");

        let err = graph.set_node_state("a", NodeState::Running).unwrap_err();
        assert!(matches!(err, GraphError::InvalidTransition { .. }));

        graph.reset_states();
        assert_eq!(graph.get_node("a").map(Node::state), Some(NodeState::Idle));
    }

    #[test]
    fn dependencies_and_dependents() {
        let mut graph = chain(&["a", "b"]);
        graph.add_node(Node::new("c", "noop")).expect("add c");
        graph
            .add_connection(Connection::between("a", "c"))
            .expect("connect");
        graph
            .add_connection(Connection::between("b", "c"))
            .expect("connect");
        graph
            .add_connection(Connection::new("a", "extra", "c", "other"))
            .expect("connect");

        assert_eq!(graph.dependencies("c"), ids(&["a", "b"]));
        assert_eq!(graph.dependents("a"), ids(&["b", "c"]));
        assert_eq!(graph.incoming("c").len(), 3);
        assert_eq!(graph.incoming("c")[0].from.as_str(), "a");
        assert_eq!(
            graph.entry_nodes().iter().map(|n| n.id.as_str()).collect::<Vec<_>>(),
            vec!["a"]
        );
    }
}

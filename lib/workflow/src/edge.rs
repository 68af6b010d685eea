//! Connections between nodes.
//!
//! A connection carries the result of one node into another:
//! `from.fromOutput -> to.toInput`.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

fn default_output() -> String {
    "output".to_string()
}

fn default_input() -> String {
    "input".to_string()
}

/// A directed connection from one node's output to another node's input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// The upstream node.
    pub from: NodeId,
    /// The output port name on the upstream node.
    #[serde(default = "default_output")]
    pub from_output: String,
    /// The downstream node.
    pub to: NodeId,
    /// The input port name on the downstream node.
    #[serde(default = "default_input")]
    pub to_input: String,
}

impl Connection {
    /// Creates a connection between named ports.
    #[must_use]
    pub fn new(
        from: impl Into<NodeId>,
        from_output: impl Into<String>,
        to: impl Into<NodeId>,
        to_input: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            from_output: from_output.into(),
            to: to.into(),
            to_input: to_input.into(),
        }
    }

    /// Creates a connection using default port names ("output" -> "input").
    #[must_use]
    pub fn between(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self::new(from, default_output(), to, default_input())
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.from, self.from_output, self.to, self.to_input
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_names() {
        let conn = Connection::between("a", "b");
        assert_eq!(conn.from_output, "output");
        assert_eq!(conn.to_input, "input");
        assert_eq!(conn.to_string(), "a.output -> b.input");
    }

    #[test]
    fn missing_port_names_default_on_parse() {
        let conn: Connection =
            serde_json::from_str(r#"{"from":"fetch","to":"parse","toInput":"html"}"#)
                .expect("deserialize");
        assert_eq!(conn.from_output, "output");
        assert_eq!(conn.to_input, "html");
    }
}

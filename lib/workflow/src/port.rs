//! Port declarations for node types.
//!
//! A node type may declare named input and output ports, each carrying a
//! [`DataKind`]. Connections between declared ports are checked for kind
//! compatibility. Types that declare nothing accept any connection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of data flowing through a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    /// Accepts or produces anything.
    #[default]
    Any,
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl DataKind {
    /// Returns true if data of this kind may flow into a port of kind `input`.
    #[must_use]
    pub fn is_compatible_with(&self, input: Self) -> bool {
        *self == Self::Any || input == Self::Any || *self == input
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a port receives or emits data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// A named, typed port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub kind: DataKind,
}

impl Port {
    /// Creates a new port.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: DataKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// The declared ports of a node type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ports {
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
}

impl Ports {
    /// Creates an empty declaration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an input port.
    #[must_use]
    pub fn input(mut self, name: impl Into<String>, kind: DataKind) -> Self {
        self.inputs.push(Port::new(name, kind));
        self
    }

    /// Adds an output port.
    #[must_use]
    pub fn output(mut self, name: impl Into<String>, kind: DataKind) -> Self {
        self.outputs.push(Port::new(name, kind));
        self
    }

    /// Looks up a port by direction and name.
    #[must_use]
    pub fn find(&self, direction: PortDirection, name: &str) -> Option<&Port> {
        let ports = match direction {
            PortDirection::Input => &self.inputs,
            PortDirection::Output => &self.outputs,
        };
        ports.iter().find(|port| port.name == name)
    }
}

/// Source of port declarations keyed by node type.
pub trait PortCatalog {
    /// Returns the declared ports of `node_type`, if it declares any.
    fn ports(&self, node_type: &str) -> Option<&Ports>;
}

/// A catalog in which no type declares ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPorts;

impl PortCatalog for NoPorts {
    fn ports(&self, _node_type: &str) -> Option<&Ports> {
        None
    }
}

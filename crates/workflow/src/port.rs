//! Typed input/output ports.

use serde::{Deserialize, Serialize};

/// The kind of payload a port carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Accepts or produces anything.
    Any,
    /// Tabular data.
    #[serde(rename = "dataframe")]
    DataFrame,
    /// Free text.
    Text,
    /// A single number.
    Number,
    /// A single boolean.
    Boolean,
    /// A calendar date or timestamp.
    Date,
    /// A file path or file handle reference.
    File,
    /// Arbitrary structured JSON.
    Json,
    /// An ordered collection.
    List,
    /// A key/value mapping.
    Dict,
}

impl DataType {
    /// Returns `true` if a packet of type `produced` may flow into a port of
    /// this type.
    ///
    /// Types are compatible when they are identical, when either side is
    /// [`DataType::Any`], or when a [`DataType::Json`] port receives a
    /// [`DataType::List`] or [`DataType::Dict`].
    #[must_use]
    pub fn accepts(self, produced: Self) -> bool {
        self == produced
            || self == Self::Any
            || produced == Self::Any
            || (self == Self::Json && matches!(produced, Self::List | Self::Dict))
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::DataFrame => "dataframe",
            Self::Text => "text",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::File => "file",
            Self::Json => "json",
            Self::List => "list",
            Self::Dict => "dict",
        };
        f.write_str(name)
    }
}

/// Declaration of a single named port on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSchema {
    /// Port name, unique among the node's inputs (or outputs).
    pub name: String,
    /// Payload type carried by the port.
    pub data_type: DataType,
    /// Whether an input port must be connected, or an output port produced.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl PortSchema {
    /// A required port.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            required: true,
        }
    }

    /// An input port that may be left unconnected.
    #[must_use]
    pub fn optional(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            required: false,
            ..Self::new(name, data_type)
        }
    }
}
